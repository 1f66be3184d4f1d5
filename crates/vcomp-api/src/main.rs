//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use vcomp_api::{create_router, metrics, ApiConfig, AppState};
use vcomp_composer::{init_tracing, Composer, ComposerConfig};
use vcomp_storage::LocalCatalog;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vcomp-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let composer_config = ComposerConfig::from_env();
    let catalog = Arc::new(
        LocalCatalog::open(&composer_config.catalog_dir)
            .await
            .with_context(|| {
                format!("opening catalog {}", composer_config.catalog_dir.display())
            })?,
    );
    info!(assets = catalog.len().await, root = %catalog.root().display(), "Catalog opened");

    let composer = Arc::new(Composer::new(
        composer_config,
        catalog.clone(),
        catalog.clone(),
        catalog,
    ));

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Failed to install Prometheus recorder, metrics disabled");
                None
            }
        }
    } else {
        None
    };

    let state = AppState::new(config.clone(), composer.clone());
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if !composer.shutdown().await {
        warn!("Running renders did not drain before shutdown");
    }
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
