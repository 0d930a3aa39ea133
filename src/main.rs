//! # Tabu Gateway - Main Entry Point
//!
//! Startup sequence:
//! 1. Load configuration (`APP_CONFIG_PATH` or `config/app.yaml`, then env overrides)
//! 2. Initialise structured logging
//! 3. Connect the warehouse client and the cache backend
//! 4. Serve until SIGINT/SIGTERM, then drain in-flight requests and pending cache writes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use tabu_gateway::observability::init_logging;
use tabu_gateway::warehouse::{BigQueryClient, BigQueryConfig, Warehouse};
use tabu_gateway::{build_store, router, AppConfig, AppState};

/// How often idle rate-limit windows are dropped
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().await.context("Failed to load configuration")?;
    init_logging(&config.logging);

    info!("Starting Tabu Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(environment = config.environment.as_str(), "Configuration loaded and validated");

    let warehouse_config = BigQueryConfig::from_settings(&config.warehouse)
        .await
        .context("Failed to read warehouse credentials")?;
    let warehouse: Arc<dyn Warehouse> =
        Arc::new(BigQueryClient::new(warehouse_config).context("Failed to create warehouse client")?);

    let store = build_store(&config.cache)
        .await
        .context("Failed to create cache backend")?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.server.bind_address, config.server.port))?;
    let shutdown_timeout = config.server.shutdown_timeout;

    let state = AppState::new(config, warehouse, store);
    let cache = state.cache.clone();
    spawn_rate_limit_cleanup(&state);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!(pending = cache.pending_writes(), "Waiting for pending cache writes");
    if tokio::time::timeout(shutdown_timeout, cache.flush_writes()).await.is_err() {
        warn!("Pending cache writes not finished after {:?}, abandoning them", shutdown_timeout);
    }

    info!("Tabu Gateway shutdown complete");
    Ok(())
}

fn spawn_rate_limit_cleanup(state: &AppState) {
    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            limiter.cleanup_expired();
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
