//! Idempotency record persistence.
//!
//! The `*_tx` functions take the writer's connection and are meant to run
//! inside the same transaction as the operation they guard.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use tillsync_core::idempotency::IdempotencyRecord;
use tillsync_core::utils::time::to_rfc3339;
use tillsync_core::Result;

use super::model::IdempotencyRecordDB;
use crate::db::{get_connection, DbPool};
use crate::errors::StorageError;
use crate::schema::idempotency_records;

pub fn find_record_tx(conn: &mut SqliteConnection, key: &str) -> Result<Option<IdempotencyRecord>> {
    idempotency_records::table
        .find(key)
        .first::<IdempotencyRecordDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(IdempotencyRecordDB::into_domain)
        .transpose()
}

pub fn insert_record_tx(conn: &mut SqliteConnection, record: &IdempotencyRecord) -> Result<()> {
    let row = IdempotencyRecordDB::from_domain(record)?;
    diesel::insert_into(idempotency_records::table)
        .values(&row)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

pub fn delete_record_tx(conn: &mut SqliteConnection, key: &str) -> Result<usize> {
    Ok(diesel::delete(idempotency_records::table.find(key))
        .execute(conn)
        .map_err(StorageError::from)?)
}

/// Remove every record whose `expires_at` is at or before `now`.
pub fn purge_expired_tx(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = to_rfc3339(now);
    Ok(diesel::delete(
        idempotency_records::table.filter(idempotency_records::expires_at.le(cutoff)),
    )
    .execute(conn)
    .map_err(StorageError::from)?)
}

/// Read-only view of stored records.
pub struct IdempotencyRepository {
    pool: Arc<DbPool>,
}

impl IdempotencyRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    pub fn get_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let mut conn = get_connection(&self.pool)?;
        find_record_tx(&mut conn, key)
    }

    pub fn count_records(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        Ok(idempotency_records::table
            .count()
            .get_result::<i64>(&mut conn)
            .map_err(StorageError::from)?)
    }
}
