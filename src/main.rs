use anyhow::Result;
use media_store::{
    config::AppConfig,
    db,
    imaging::{ImageOptimizer, MetadataCache, ProfileTable},
    routes::routes::app,
    services::{storage_service::StorageService, upload_service::UploadService},
    state::AppState,
};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real env vars still apply.
    let _ = dotenvy::dotenv();

    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting media-store with config: {:?}", cfg);

    // --- Ensure files directory exists ---
    if !Path::new(&cfg.files_path).exists() {
        fs::create_dir_all(&cfg.files_path)?;
        tracing::info!("Created files directory at {}", cfg.files_path);
    }

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url).await?;

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::run_migrations(&pool).await?;

    // --- Initialize services ---
    let storage = StorageService::new(Arc::new(pool), &cfg.files_path, cfg.public_url.clone());
    let cache = Arc::new(MetadataCache::new(cfg.cache_ttl()));
    let uploads = UploadService::new(
        storage.clone(),
        ImageOptimizer::new(cache),
        Arc::new(ProfileTable::default()),
    );
    let state = AppState { storage, uploads };

    // --- Build router ---
    let app = app(state, cfg.max_upload_bytes);

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
