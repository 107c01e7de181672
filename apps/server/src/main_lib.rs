//! Application state wiring and background tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use tillsync_core::idempotency::{EntityQueryTrait, IdempotencyPolicy, IdempotentExecutorTrait};
use tillsync_storage_sqlite::{Database, DatabaseRole, PosRepository, TransactionExecutor};

use crate::config::ServerConfig;
use crate::events::EventBus;

pub struct AppState {
    pub executor: Arc<dyn IdempotentExecutorTrait>,
    pub query: Arc<dyn EntityQueryTrait>,
    pub event_bus: EventBus,
}

/// Open the database and build the shared state.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let db = Database::open(&config.db_path, DatabaseRole::Server)?;
    info!("Database ready at {}", config.db_path);

    let event_bus = EventBus::new();
    let policy = IdempotencyPolicy::with_ttl_hours(config.idempotency_ttl_hours);
    let executor = TransactionExecutor::new(db.writer.clone(), policy)
        .with_event_sink(Arc::new(event_bus.clone()));

    Ok(Arc::new(AppState {
        executor: Arc::new(executor),
        query: Arc::new(PosRepository::new(db.pool)),
        event_bus,
    }))
}

/// Periodically delete expired idempotency records.
pub fn spawn_purge_task(state: Arc<AppState>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match state.executor.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => info!("Purged {} expired idempotency records", removed),
                Err(err) => warn!("Idempotency purge failed: {}", err),
            }
        }
    })
}
