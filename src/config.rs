use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_FILES_PATH: &str = "./public/files";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/meta/media_store.db";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub files_path: String,
    pub public_url: String,
    pub database_url: String,
    pub max_upload_bytes: usize,
    pub cache_ttl_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Media upload and image optimization service")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides MEDIA_STORE_FILES_PATH)
    #[arg(long)]
    pub files_path: Option<String>,

    /// Base URL stored files are served from (overrides MEDIA_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Database URL (overrides MEDIA_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted request body in bytes (overrides MEDIA_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Image metadata cache lifetime in seconds (overrides MEDIA_STORE_CACHE_TTL_SECS)
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables returned by `lookup`. CLI wins.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| text("MEDIA_STORE_HOST", DEFAULT_HOST)),
            port: match args.port {
                Some(port) => port,
                None => parsed(&lookup, "MEDIA_STORE_PORT", DEFAULT_PORT)?,
            },
            files_path: args
                .files_path
                .unwrap_or_else(|| text("MEDIA_STORE_FILES_PATH", DEFAULT_FILES_PATH)),
            public_url: args
                .public_url
                .unwrap_or_else(|| text("MEDIA_STORE_PUBLIC_URL", DEFAULT_PUBLIC_URL)),
            database_url: args
                .database_url
                .unwrap_or_else(|| text("MEDIA_STORE_DATABASE_URL", DEFAULT_DATABASE_URL)),
            max_upload_bytes: match args.max_upload_bytes {
                Some(bytes) => bytes,
                None => parsed(
                    &lookup,
                    "MEDIA_STORE_MAX_UPLOAD_BYTES",
                    DEFAULT_MAX_UPLOAD_BYTES,
                )?,
            },
            cache_ttl_secs: match args.cache_ttl_secs {
                Some(secs) => secs,
                None => parsed(&lookup, "MEDIA_STORE_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?,
            },
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}
