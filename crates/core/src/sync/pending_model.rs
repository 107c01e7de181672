//! Client-side pending operation model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;
use crate::operations::{HttpMethod, OperationPayload, OperationType};
use crate::utils::time::{parse_rfc3339, to_rfc3339};

/// A mutation waiting for server confirmation.
///
/// Rows are removed only after a 2xx for `idempotency_key` or a terminal
/// rejection; transient failures only bump `retry_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: i64,
    pub idempotency_key: String,
    pub operation_type: OperationType,
    pub stream_key: String,
    pub method: HttpMethod,
    pub target_endpoint: String,
    pub payload: OperationPayload,
    pub enqueued_at: String,
    pub retry_count: i32,
    pub next_attempt_at: Option<String>,
    pub first_attempt_at: Option<String>,
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Due when no retry is scheduled or the scheduled time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match &self.next_attempt_at {
            None => true,
            Some(at) => parse_rfc3339(at).map(|at| at <= now).unwrap_or(true),
        }
    }

    /// Cancellation is only safe while the server cannot have seen the key.
    pub fn can_cancel(&self) -> bool {
        self.first_attempt_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPendingOperation {
    pub idempotency_key: String,
    pub operation_type: OperationType,
    pub stream_key: String,
    pub method: HttpMethod,
    pub target_endpoint: String,
    pub payload: OperationPayload,
    pub enqueued_at: String,
}

impl NewPendingOperation {
    /// Validate the payload and assign a fresh idempotency key.
    pub fn from_payload(payload: OperationPayload, now: DateTime<Utc>) -> Result<Self> {
        payload.validate()?;
        let (method, target_endpoint) = payload.endpoint();
        Ok(Self {
            idempotency_key: Uuid::now_v7().to_string(),
            operation_type: payload.operation_type(),
            stream_key: payload.stream_key(),
            method,
            target_endpoint,
            payload,
            enqueued_at: to_rfc3339(now),
        })
    }
}

/// Generate a client-side entity id for a new order, session, cut or
/// coworking session.
pub fn new_entity_id() -> String {
    Uuid::now_v7().to_string()
}
