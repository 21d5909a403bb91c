mod config;
mod contract;
mod ens;
mod entities;
mod eth;
mod http;
mod relay;
mod state;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RelayConfig;
use crate::state::AppState;
use crate::store::{MemoryStore, PostgresStore, RelayStore};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = RelayConfig::load().context("Failed to load configuration")?;

    let store = build_store(&config).await?;
    let app_state = AppState::build(&config, store)?;

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("Tap relay listening on {local_addr}");

    let router: Router = http::router(app_state, &config.cors);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server exited with error")?;

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

/// Postgres when a database URL is configured, otherwise the process-local
/// ephemeral store.
async fn build_store(config: &RelayConfig) -> Result<Arc<dyn RelayStore>> {
    let Some(url) = config.store.database_url.as_deref() else {
        warn!(
            "No database configured; using the in-memory store. State will not \
             survive a restart and caps cannot span multiple instances."
        );
        return Ok(Arc::new(MemoryStore::new()));
    };

    let mut options = ConnectOptions::new(url.to_string());
    options
        .max_connections(config.store.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));
    if let Some(min) = config.store.min_connections {
        options.min_connections(min);
    }
    assert!(
        config.store.max_connections >= config.store.min_connections.unwrap_or(1),
        "Max connections must be >= min connections"
    );
    assert!(
        config.store.max_connections <= 128,
        "Connection pool oversized"
    );

    let database = Database::connect(options)
        .await
        .context("Failed to connect to PostgreSQL")?;
    migration::Migrator::up(&database, None)
        .await
        .context("Database migrations failed")?;
    Ok(Arc::new(PostgresStore::new(database)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutdown signal received");
}
