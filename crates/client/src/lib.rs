//! Device-side sync for tillsync.
//!
//! Mutations are queued locally with an idempotency key and delivered to the
//! POS server by the [`SyncOrchestrator`]; server changes arrive through the
//! [`PushListener`] and are mirrored into the local entity store.

mod client;
mod config;
mod error;
mod orchestrator;
mod push;
mod sse;

pub use client::{PosApiClient, SyncTransport};
pub use config::{SyncConfig, DEFAULT_SERVER_URL};
pub use error::{ClientError, Result};
pub use orchestrator::{SyncNotice, SyncOrchestrator};
pub use push::PushListener;
pub use sse::{SseDecoder, SseFrame};

// Re-export the types callers need to build and inspect operations.
pub use tillsync_core::operations::OperationPayload;
pub use tillsync_core::sync::{new_entity_id, DrainReport, PendingOperation};
