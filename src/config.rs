use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

/// Which object store implementation serves the configured bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ObjectBackend {
    /// Payloads on local disk, object metadata in SQLite.
    Local,
    /// AWS S3 (or any S3-compatible endpoint).
    S3,
}

impl FromStr for ObjectBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => anyhow::bail!("unknown object backend `{}` (expected local or s3)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub object_backend: ObjectBackend,
    pub storage_dir: String,
    pub database_url: String,
    pub staging_dir: String,
    pub page_size: usize,
    pub listing_folder: Option<String>,
    pub s3_endpoint: Option<String>,
    pub aws_region: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Dataset gateway over an object store and a user store")]
pub struct Args {
    /// Host to bind to (overrides SANCTUM_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SANCTUM_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket holding the uploaded datasets (overrides SANCTUM_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Object store backend (overrides SANCTUM_OBJECT_BACKEND)
    #[arg(long, value_enum)]
    pub object_backend: Option<ObjectBackend>,

    /// Directory for the local backend's payloads (overrides SANCTUM_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides SANCTUM_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Root for per-request staging directories (overrides SANCTUM_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Entries per listing page (overrides SANCTUM_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Only list entries under this top-level folder (overrides SANCTUM_LISTING_FOLDER)
    #[arg(long)]
    pub listing_folder: Option<String>,

    /// Custom S3 endpoint, e.g. a MinIO server (overrides SANCTUM_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// AWS region for the S3 backend (overrides SANCTUM_AWS_REGION)
    #[arg(long)]
    pub aws_region: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge already-parsed CLI args over the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("SANCTUM_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("SANCTUM_PORT", 5000u16)?;
        let env_bucket = env::var("SANCTUM_BUCKET").unwrap_or_else(|_| "sanctum-datasets".into());
        let env_backend = parse_env("SANCTUM_OBJECT_BACKEND", ObjectBackend::Local)?;
        let env_storage =
            env::var("SANCTUM_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("SANCTUM_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/sanctum.db".into());
        let env_staging =
            env::var("SANCTUM_STAGING_DIR").unwrap_or_else(|_| "./data/staging".into());
        let env_page_size = parse_env("SANCTUM_PAGE_SIZE", 100usize)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            bucket: args.bucket.unwrap_or(env_bucket),
            object_backend: args.object_backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            staging_dir: args.staging_dir.unwrap_or(env_staging),
            page_size: args.page_size.unwrap_or(env_page_size).clamp(1, 1000),
            listing_folder: args
                .listing_folder
                .or_else(|| env::var("SANCTUM_LISTING_FOLDER").ok())
                .filter(|folder| !folder.is_empty()),
            s3_endpoint: args
                .s3_endpoint
                .or_else(|| env::var("SANCTUM_S3_ENDPOINT").ok()),
            aws_region: args.aws_region.or_else(|| env::var("SANCTUM_AWS_REGION").ok()),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
