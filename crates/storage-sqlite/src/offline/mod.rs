//! Client-side persistence: pending operation queue and local entity cache.

mod model;
mod repository;

pub use model::{LocalCollectionDB, LocalEntityDB, NewPendingOperationDB, PendingOperationDB};
pub use repository::{LocalEntityRepository, PendingOperationRepository};
