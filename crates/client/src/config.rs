//! Client sync configuration.

use std::time::Duration;

use tillsync_core::entities::Collection;
use tillsync_core::sync::{
    SYNC_DELIVERY_DELAY_NOTICE_ATTEMPTS, SYNC_DRAIN_INTERVAL_SECS, SYNC_POLL_INTERVAL_SECS,
    SYNC_REQUEST_TIMEOUT_SECS, SYNC_STALENESS_THRESHOLD_SECS,
};

/// Default server address for a till on the shop network.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8088";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Cadence of the pull fallback while the push channel is down.
    pub poll_interval: Duration,
    pub drain_interval: Duration,
    pub staleness_threshold: chrono::Duration,
    pub delivery_delay_notice_attempts: i32,
    /// Collections mirrored into the local store.
    pub tracked_collections: Vec<Collection>,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout: Duration::from_secs(SYNC_REQUEST_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(SYNC_POLL_INTERVAL_SECS),
            drain_interval: Duration::from_secs(SYNC_DRAIN_INTERVAL_SECS),
            staleness_threshold: chrono::Duration::seconds(SYNC_STALENESS_THRESHOLD_SECS),
            delivery_delay_notice_attempts: SYNC_DELIVERY_DELAY_NOTICE_ATTEMPTS,
            tracked_collections: Collection::ALL.to_vec(),
        }
    }
}
