//! SQLite storage for tillsync.
//!
//! The server database holds the POS ledger and idempotency records; the
//! client database holds the pending operation queue and the local entity
//! cache. Both share the pool, migrations runner and single writer actor.

pub mod db;
pub mod errors;
pub mod executor;
pub mod idempotency;
pub mod offline;
pub mod pos;
pub mod schema;

mod utils;

pub use db::{create_pool, get_connection, run_migrations, Database, DatabaseRole, DbPool, WriteHandle};
pub use errors::StorageError;
pub use executor::TransactionExecutor;
pub use idempotency::IdempotencyRepository;
pub use offline::{LocalEntityRepository, PendingOperationRepository};
pub use pos::PosRepository;
