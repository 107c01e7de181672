//! Database model for idempotency records.

use diesel::prelude::*;

use tillsync_core::idempotency::IdempotencyRecord;
use tillsync_core::Result;

use crate::utils::{enum_from_db, enum_to_db};

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(primary_key(key))]
#[diesel(table_name = crate::schema::idempotency_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IdempotencyRecordDB {
    pub key: String,
    pub operation_type: String,
    pub request_fingerprint: String,
    pub result_snapshot: String,
    pub created_at: String,
    pub expires_at: String,
}

impl IdempotencyRecordDB {
    pub fn from_domain(record: &IdempotencyRecord) -> Result<Self> {
        Ok(Self {
            key: record.key.clone(),
            operation_type: enum_to_db(&record.operation_type)?,
            request_fingerprint: record.request_fingerprint.clone(),
            result_snapshot: record.result_snapshot.clone(),
            created_at: record.created_at.clone(),
            expires_at: record.expires_at.clone(),
        })
    }

    pub fn into_domain(self) -> Result<IdempotencyRecord> {
        Ok(IdempotencyRecord {
            key: self.key,
            operation_type: enum_from_db(&self.operation_type)?,
            request_fingerprint: self.request_fingerprint,
            result_snapshot: self.result_snapshot,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}
