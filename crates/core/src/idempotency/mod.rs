//! Idempotency model and the executor contract.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::Collection;
use crate::errors::{Error, Result, ValidationError};
use crate::operations::{OperationPayload, OperationType};
use crate::utils::time::parse_rfc3339;

/// Request header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Response header set to `true` when the body is a stored result.
pub const IDEMPOTENT_REPLAY_HEADER: &str = "x-idempotent-replayed";

/// Longest accepted retention: one year.
pub const MAX_IDEMPOTENCY_TTL_HOURS: i64 = 24 * 366;

/// Default retention of idempotency records.
///
/// The client backoff ceiling is ~21 minutes, but a device may stay offline
/// for a weekend with operations queued, so retention covers days.
pub const DEFAULT_IDEMPOTENCY_TTL_HOURS: i64 = 72;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

pub fn validate_idempotency_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation(ValidationError::InvalidIdempotencyKey(
            "key is empty".to_string(),
        )));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(Error::Validation(ValidationError::InvalidIdempotencyKey(
            format!("key exceeds {} characters", MAX_IDEMPOTENCY_KEY_LEN),
        )));
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(Error::Validation(ValidationError::InvalidIdempotencyKey(
            "key must be printable ASCII without spaces".to_string(),
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation_type: OperationType,
    pub request_fingerprint: String,
    /// Serialized result of the first successful execution, returned verbatim.
    pub result_snapshot: String,
    pub created_at: String,
    pub expires_at: String,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match parse_rfc3339(&self.expires_at) {
            Ok(expires_at) => expires_at <= now,
            Err(_) => true,
        }
    }

    /// Same key, same request: the stored result may be replayed.
    pub fn matches(&self, operation_type: OperationType, fingerprint: &str) -> bool {
        self.operation_type == operation_type && self.request_fingerprint == fingerprint
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyPolicy {
    pub ttl: Duration,
}

impl IdempotencyPolicy {
    /// Clamped to between one hour and `MAX_IDEMPOTENCY_TTL_HOURS`.
    pub fn with_ttl_hours(hours: i64) -> Self {
        Self {
            ttl: Duration::hours(hours.clamp(1, MAX_IDEMPOTENCY_TTL_HOURS)),
        }
    }

    pub fn expires_at(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self::with_ttl_hours(DEFAULT_IDEMPOTENCY_TTL_HOURS)
    }
}

/// Result of an idempotent execution as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub operation_type: OperationType,
    pub result_snapshot: String,
    pub replayed: bool,
}

impl ExecutionOutcome {
    pub fn result_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.result_snapshot)?)
    }
}

/// Runs typed operations exactly once per idempotency key.
#[async_trait]
pub trait IdempotentExecutorTrait: Send + Sync {
    async fn execute(&self, key: String, payload: OperationPayload) -> Result<ExecutionOutcome>;

    /// Delete records whose retention window has passed. Returns rows removed.
    async fn purge_expired(&self) -> Result<usize>;
}

/// Read side used by pull endpoints.
pub trait EntityQueryTrait: Send + Sync {
    fn list_collection(&self, collection: Collection) -> Result<Vec<serde_json::Value>>;
    fn get_entity(&self, collection: Collection, entity_id: &str)
        -> Result<Option<serde_json::Value>>;
}
