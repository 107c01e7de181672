//! Database models for the client-side queue and entity cache.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use tillsync_core::sync::{LocalEntityRecord, NewPendingOperation, PendingOperation};
use tillsync_core::Result;

use crate::utils::{enum_from_db, enum_to_db};

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::pending_operations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PendingOperationDB {
    pub id: i64,
    pub idempotency_key: String,
    pub operation_type: String,
    pub stream_key: String,
    pub method: String,
    pub target_endpoint: String,
    pub payload: String,
    pub enqueued_at: String,
    pub retry_count: i32,
    pub next_attempt_at: Option<String>,
    pub first_attempt_at: Option<String>,
    pub last_error: Option<String>,
}

impl PendingOperationDB {
    pub fn into_domain(self) -> Result<PendingOperation> {
        Ok(PendingOperation {
            id: self.id,
            idempotency_key: self.idempotency_key,
            operation_type: enum_from_db(&self.operation_type)?,
            stream_key: self.stream_key,
            method: self.method.parse()?,
            target_endpoint: self.target_endpoint,
            payload: serde_json::from_str(&self.payload)?,
            enqueued_at: self.enqueued_at,
            retry_count: self.retry_count,
            next_attempt_at: self.next_attempt_at,
            first_attempt_at: self.first_attempt_at,
            last_error: self.last_error,
        })
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::pending_operations)]
pub struct NewPendingOperationDB {
    pub idempotency_key: String,
    pub operation_type: String,
    pub stream_key: String,
    pub method: String,
    pub target_endpoint: String,
    pub payload: String,
    pub enqueued_at: String,
    pub retry_count: i32,
}

impl NewPendingOperationDB {
    pub fn from_domain(operation: &NewPendingOperation) -> Result<Self> {
        Ok(Self {
            idempotency_key: operation.idempotency_key.clone(),
            operation_type: enum_to_db(&operation.operation_type)?,
            stream_key: operation.stream_key.clone(),
            method: operation.method.as_str().to_string(),
            target_endpoint: operation.target_endpoint.clone(),
            payload: serde_json::to_string(&operation.payload)?,
            enqueued_at: operation.enqueued_at.clone(),
            retry_count: 0,
        })
    }
}

#[derive(
    Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone, Serialize, Deserialize,
)]
#[diesel(primary_key(collection, entity_id))]
#[diesel(table_name = crate::schema::local_entities)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LocalEntityDB {
    pub collection: String,
    pub entity_id: String,
    pub data: String,
    pub last_updated: String,
    pub provisional: i32,
    pub confirmed_data: Option<String>,
}

impl LocalEntityDB {
    pub fn from_domain(record: &LocalEntityRecord) -> Result<Self> {
        Ok(Self {
            collection: record.collection.as_str().to_string(),
            entity_id: record.entity_id.clone(),
            data: serde_json::to_string(&record.data)?,
            last_updated: record.last_updated.clone(),
            provisional: i32::from(record.provisional),
            confirmed_data: record
                .confirmed_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        })
    }

    pub fn into_domain(self) -> Result<LocalEntityRecord> {
        Ok(LocalEntityRecord {
            collection: self.collection.parse()?,
            entity_id: self.entity_id,
            data: serde_json::from_str(&self.data)?,
            last_updated: self.last_updated,
            provisional: self.provisional != 0,
            confirmed_data: self
                .confirmed_data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
        })
    }
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(primary_key(collection))]
#[diesel(table_name = crate::schema::local_collections)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LocalCollectionDB {
    pub collection: String,
    pub last_refreshed_at: Option<String>,
}
