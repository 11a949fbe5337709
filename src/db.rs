//! SQLite pool setup and the embedded schema migrations.

use anyhow::{Context, Result};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{fs, path::Path, sync::Arc};

const INIT_MIGRATION: &str = include_str!("../migrations/0001_init.sql");

/// Open the pool, creating the database file and its directory on first use.
pub async fn connect(database_url: &str) -> Result<Arc<SqlitePool>> {
    tracing::debug!("Connecting using raw URL => {}", database_url);

    // Extract the local file path SQLx will use
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let in_memory = db_path.starts_with(":memory:");

    if !in_memory {
        let db_path_obj = Path::new(db_path);
        if let Some(parent) = db_path_obj.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
        if !db_path_obj.exists() {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(db_path_obj)
                .with_context(|| format!("creating database file {}", db_path))?;
            tracing::info!("Created database file {}", db_path);
        }
    }

    let mut options = SqlitePoolOptions::new().max_connections(5);
    if in_memory {
        // every connection would otherwise see its own empty database
        options = options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = options
        .connect(database_url)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;
    Ok(Arc::new(pool))
}

/// Run the embedded migration statement by statement. Every statement is
/// `IF NOT EXISTS`, so running it twice is harmless.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = INIT_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

/// A migrated single-connection in-memory database.
#[cfg(test)]
pub async fn test_pool() -> Arc<SqlitePool> {
    let pool = connect("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
