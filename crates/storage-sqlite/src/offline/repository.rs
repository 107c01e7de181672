//! Client-side pending operation queue and local entity cache.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;

use tillsync_core::entities::Collection;
use tillsync_core::sync::{
    CollectionState, LocalEntityRecord, LocalEntityStore, NewPendingOperation, PendingOperation,
    PendingOperationStore,
};
use tillsync_core::Result;

use super::model::{LocalCollectionDB, LocalEntityDB, NewPendingOperationDB, PendingOperationDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{local_collections, local_entities, pending_operations};

fn upsert_local_entity_tx(conn: &mut SqliteConnection, record: &LocalEntityRecord) -> Result<()> {
    let row = LocalEntityDB::from_domain(record)?;
    diesel::insert_into(local_entities::table)
        .values(&row)
        .on_conflict((local_entities::collection, local_entities::entity_id))
        .do_update()
        .set(&row)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

pub struct PendingOperationRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl PendingOperationRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl PendingOperationStore for PendingOperationRepository {
    async fn enqueue(
        &self,
        operation: NewPendingOperation,
        provisional: Option<LocalEntityRecord>,
    ) -> Result<PendingOperation> {
        let row = NewPendingOperationDB::from_domain(&operation)?;
        let stored = self
            .writer
            .exec(move |conn| {
                let stored = diesel::insert_into(pending_operations::table)
                    .values(&row)
                    .returning(PendingOperationDB::as_returning())
                    .get_result::<PendingOperationDB>(conn)
                    .map_err(StorageError::from)?;
                if let Some(record) = provisional {
                    upsert_local_entity_tx(conn, &record)?;
                }
                stored.into_domain()
            })
            .await?;
        debug!(
            "[Queue] Enqueued #{} {} on {}",
            stored.id, stored.operation_type, stored.stream_key
        );
        Ok(stored)
    }

    fn list_pending(&self) -> Result<Vec<PendingOperation>> {
        let mut conn = get_connection(&self.pool)?;
        pending_operations::table
            .order(pending_operations::id.asc())
            .load::<PendingOperationDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(PendingOperationDB::into_domain)
            .collect()
    }

    fn get_pending(&self, id: i64) -> Result<Option<PendingOperation>> {
        let mut conn = get_connection(&self.pool)?;
        pending_operations::table
            .find(id)
            .first::<PendingOperationDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(PendingOperationDB::into_domain)
            .transpose()
    }

    async fn mark_attempted(&self, id: i64, attempted_at: String) -> Result<bool> {
        self.writer
            .exec(move |conn| {
                diesel::update(
                    pending_operations::table
                        .find(id)
                        .filter(pending_operations::first_attempt_at.is_null()),
                )
                .set(pending_operations::first_attempt_at.eq(Some(attempted_at)))
                .execute(conn)
                .map_err(StorageError::from)?;
                let remaining = pending_operations::table
                    .find(id)
                    .count()
                    .get_result::<i64>(conn)
                    .map_err(StorageError::from)?;
                Ok(remaining > 0)
            })
            .await
    }

    async fn remove(&self, id: i64) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::delete(pending_operations::table.find(id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn schedule_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_attempt_at: String,
        last_error: String,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::update(pending_operations::table.find(id))
                    .set((
                        pending_operations::retry_count.eq(retry_count),
                        pending_operations::next_attempt_at.eq(Some(next_attempt_at)),
                        pending_operations::last_error.eq(Some(last_error)),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn cancel(&self, id: i64) -> Result<bool> {
        self.writer
            .exec(move |conn| {
                let removed = diesel::delete(
                    pending_operations::table
                        .find(id)
                        .filter(pending_operations::first_attempt_at.is_null()),
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(removed > 0)
            })
            .await
    }
}

pub struct LocalEntityRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl LocalEntityRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl LocalEntityStore for LocalEntityRepository {
    async fn upsert_entities(&self, records: Vec<LocalEntityRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.writer
            .exec(move |conn| {
                for record in &records {
                    upsert_local_entity_tx(conn, record)?;
                }
                Ok(())
            })
            .await
    }

    async fn replace_collection(
        &self,
        collection: Collection,
        records: Vec<LocalEntityRecord>,
        refreshed_at: String,
    ) -> Result<()> {
        let collection_name = collection.as_str().to_string();
        self.writer
            .exec(move |conn| {
                let provisional_ids: HashSet<String> = local_entities::table
                    .filter(local_entities::collection.eq(&collection_name))
                    .filter(local_entities::provisional.ne(0))
                    .select(local_entities::entity_id)
                    .load::<String>(conn)
                    .map_err(StorageError::from)?
                    .into_iter()
                    .collect();

                diesel::delete(
                    local_entities::table
                        .filter(local_entities::collection.eq(&collection_name))
                        .filter(local_entities::provisional.eq(0)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;

                for record in &records {
                    if !provisional_ids.contains(&record.entity_id) {
                        upsert_local_entity_tx(conn, record)?;
                        continue;
                    }
                    // Keep the pending edit, refresh the server copy behind it.
                    diesel::update(
                        local_entities::table
                            .find((collection_name.as_str(), record.entity_id.as_str())),
                    )
                    .set(
                        local_entities::confirmed_data
                            .eq(Some(serde_json::to_string(&record.data)?)),
                    )
                    .execute(conn)
                    .map_err(StorageError::from)?;
                }

                diesel::insert_into(local_collections::table)
                    .values(&LocalCollectionDB {
                        collection: collection_name.clone(),
                        last_refreshed_at: Some(refreshed_at.clone()),
                    })
                    .on_conflict(local_collections::collection)
                    .do_update()
                    .set(local_collections::last_refreshed_at.eq(Some(refreshed_at)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn remove_entity(&self, collection: Collection, entity_id: &str) -> Result<()> {
        let collection_name = collection.as_str().to_string();
        let entity_id = entity_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(
                    local_entities::table
                        .filter(local_entities::collection.eq(collection_name))
                        .filter(local_entities::entity_id.eq(entity_id)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn get_entity(
        &self,
        collection: Collection,
        entity_id: &str,
    ) -> Result<Option<LocalEntityRecord>> {
        let mut conn = get_connection(&self.pool)?;
        local_entities::table
            .find((collection.as_str(), entity_id))
            .first::<LocalEntityDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(LocalEntityDB::into_domain)
            .transpose()
    }

    fn list_collection(&self, collection: Collection) -> Result<Vec<LocalEntityRecord>> {
        let mut conn = get_connection(&self.pool)?;
        local_entities::table
            .filter(local_entities::collection.eq(collection.as_str()))
            .order(local_entities::entity_id.asc())
            .load::<LocalEntityDB>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(LocalEntityDB::into_domain)
            .collect()
    }

    fn collection_state(&self, collection: Collection) -> Result<CollectionState> {
        let mut conn = get_connection(&self.pool)?;
        let row = local_collections::table
            .find(collection.as_str())
            .first::<LocalCollectionDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(CollectionState {
            collection,
            last_refreshed_at: row.and_then(|r| r.last_refreshed_at),
        })
    }
}
