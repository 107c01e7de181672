mod model;
mod repository;

pub use model::IdempotencyRecordDB;
pub use repository::{
    delete_record_tx, find_record_tx, insert_record_tx, purge_expired_tx, IdempotencyRepository,
};
