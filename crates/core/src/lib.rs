//! Domain core for tillsync: entities, typed operations, idempotency model,
//! change events and the client-side sync state machine.

pub mod entities;
pub mod errors;
pub mod events;
pub mod idempotency;
pub mod operations;
pub mod sync;
pub mod utils;

pub use errors::{Error, Result};
