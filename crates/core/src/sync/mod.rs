//! Offline queue and reconciliation models shared by client and storage.

mod drain_machine;
mod local_model;
mod pending_model;
mod retry;
mod scheduler;
mod store;

pub use drain_machine::*;
pub use local_model::*;
pub use pending_model::*;
pub use retry::*;
pub use scheduler::*;
pub use store::*;
