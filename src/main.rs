//! roxy - caching image proxy

use anyhow::{Context, Result};
use roxy::config::{check_storage_dir, default_cache_dir, LogFormat, LoggingConfig};
use roxy::{api, metrics, Config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    init_logging(&config.logging);

    info!("Starting roxy v{}", env!("CARGO_PKG_VERSION"));

    let cache_dir = config.cache.dir.clone().unwrap_or_else(default_cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache directory {}", cache_dir.display()))?;
    check_storage_dir(&cache_dir)?;
    info!("Using cache directory {}", cache_dir.display());

    // Initialize metrics
    metrics::init();

    api::run(&config, &cache_dir).await
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}
