//! Scheduler constants for the client sync loop.

/// Periodic drain cadence in seconds.
pub const SYNC_DRAIN_INTERVAL_SECS: u64 = 10;

/// Maximum jitter (milliseconds) added to periodic cycle intervals.
pub const SYNC_INTERVAL_JITTER_MS: u64 = 750;

/// Polling cadence used while the push channel is unavailable.
pub const SYNC_POLL_INTERVAL_SECS: u64 = 5;

/// A local record older than this is refreshed in the background.
pub const SYNC_STALENESS_THRESHOLD_SECS: i64 = 60;

/// Upper bound for a single HTTP request. A timeout is an unknown outcome.
pub const SYNC_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Failed attempts after which the user is told delivery is delayed.
pub const SYNC_DELIVERY_DELAY_NOTICE_ATTEMPTS: i32 = 6;

/// Server keep-alive period on the push channel.
pub const PUSH_KEEP_ALIVE_SECS: u64 = 15;

/// Delay before re-opening a dropped push channel.
pub const PUSH_RECONNECT_DELAY_SECS: u64 = 3;
