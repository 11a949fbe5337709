use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, ObjectBackend};
use services::{
    local_store::LocalObjectStore, object_store::ObjectStore, s3_store::S3ObjectStore,
    staging::StagingArea, user_store::SqliteUserStore,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting sanctum-gateway with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database_url).await?;

    // --- Schema (idempotent); `--migrate` stops here ---
    db::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Object store for the dataset bucket ---
    let objects: Arc<dyn ObjectStore> = match cfg.object_backend {
        ObjectBackend::Local => {
            ensure_dir(&cfg.storage_dir)?;
            let store = LocalObjectStore::new(db.clone(), cfg.storage_dir.clone());
            store.ensure_bucket(&cfg.bucket).await?;
            Arc::new(store)
        }
        ObjectBackend::S3 => Arc::new(S3ObjectStore::from_config(&cfg).await),
    };
    tracing::info!(
        "Serving bucket `{}` from the {} object store",
        cfg.bucket,
        objects.backend_name()
    );

    ensure_dir(&cfg.staging_dir)?;
    let state = AppState::new(
        objects,
        Arc::new(SqliteUserStore::new(db)),
        StagingArea::new(cfg.staging_dir.clone()),
        cfg.bucket.clone(),
        cfg.page_size,
        cfg.listing_folder.clone(),
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

fn ensure_dir(dir: &str) -> Result<()> {
    if !Path::new(dir).exists() {
        fs::create_dir_all(dir)?;
        tracing::info!("Created directory {}", dir);
    }
    Ok(())
}
