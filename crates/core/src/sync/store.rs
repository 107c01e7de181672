//! Storage contracts for the client-side queue and local entity cache.

use async_trait::async_trait;

use super::local_model::{CollectionState, LocalEntityRecord};
use super::pending_model::{NewPendingOperation, PendingOperation};
use crate::entities::Collection;
use crate::errors::Result;

#[async_trait]
pub trait PendingOperationStore: Send + Sync {
    /// Persist the operation, and its optimistic local effect when given, in
    /// one transaction.
    async fn enqueue(
        &self,
        operation: NewPendingOperation,
        provisional: Option<LocalEntityRecord>,
    ) -> Result<PendingOperation>;

    /// All queued operations in enqueue order.
    fn list_pending(&self) -> Result<Vec<PendingOperation>>;

    fn get_pending(&self, id: i64) -> Result<Option<PendingOperation>>;

    /// Claim the operation for sending and record that its key may reach
    /// the server from now on. Returns `false` when the operation is gone
    /// (cancelled), in which case it must not be sent. Idempotent.
    async fn mark_attempted(&self, id: i64, attempted_at: String) -> Result<bool>;

    async fn remove(&self, id: i64) -> Result<()>;

    async fn schedule_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_attempt_at: String,
        last_error: String,
    ) -> Result<()>;

    /// Delete the operation if it has never been sent. Returns whether a row
    /// was removed.
    async fn cancel(&self, id: i64) -> Result<bool>;
}

#[async_trait]
pub trait LocalEntityStore: Send + Sync {
    async fn upsert_entities(&self, records: Vec<LocalEntityRecord>) -> Result<()>;

    /// Replace a collection with a full server snapshot and stamp its refresh
    /// time. Provisional rows are kept until their own write resolves.
    async fn replace_collection(
        &self,
        collection: Collection,
        records: Vec<LocalEntityRecord>,
        refreshed_at: String,
    ) -> Result<()>;

    async fn remove_entity(&self, collection: Collection, entity_id: &str) -> Result<()>;

    fn get_entity(&self, collection: Collection, entity_id: &str)
        -> Result<Option<LocalEntityRecord>>;

    fn list_collection(&self, collection: Collection) -> Result<Vec<LocalEntityRecord>>;

    fn collection_state(&self, collection: Collection) -> Result<CollectionState>;
}
