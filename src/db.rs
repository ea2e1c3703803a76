//! SQLite connection setup and schema migration.

use anyhow::{Context, Result};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

/// Schema applied by [`run_migrations`]. Statements are idempotent.
const INIT_MIGRATION: &str = include_str!("../migrations/0001_init.sql");

/// Connect to the database at `db_url`, creating the file and its parent
/// directory when they do not exist yet.
pub async fn connect(db_url: &str) -> Result<SqlitePool> {
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let in_memory = db_path.starts_with(":memory:");

    if !in_memory {
        let db_path_obj = Path::new(db_path);
        if let Some(parent) = db_path_obj.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }

        // SQLx refuses to open a missing file unless `mode=rwc` is given.
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(db_path)
        {
            Ok(_) => tracing::debug!("Database file can be created/opened successfully."),
            Err(e) => tracing::warn!("Failed to open database file manually: {}", e),
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect(db_url)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    Ok(pool)
}

/// Single-connection in-memory database; every connection to `:memory:`
/// would otherwise see its own empty schema.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    connect("sqlite::memory:").await
}

/// Run the embedded schema statements one by one.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = INIT_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("executing migration statement `{}`", stmt))?;
    }

    Ok(())
}
