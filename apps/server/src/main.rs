mod api;
mod config;
mod error;
mod events;
mod main_lib;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::main_lib::{build_state, spawn_purge_task};

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let state = build_state(&config)?;
    let purge = spawn_purge_task(state.clone(), config.purge_interval);

    let app = api::app_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("tillsync server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    purge.abort();
    Ok(())
}
