//! Atomic transaction executor: idempotency bookkeeping and business effects
//! in one writer transaction, broadcast after commit.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use tillsync_core::errors::{BusinessRejection, DatabaseError, Error, Result};
use tillsync_core::events::{coalesce_changes, DomainEventSink, EntityChange, NoOpDomainEventSink};
use tillsync_core::idempotency::{
    validate_idempotency_key, ExecutionOutcome, IdempotencyPolicy, IdempotencyRecord,
    IdempotentExecutorTrait,
};
use tillsync_core::operations::OperationPayload;
use tillsync_core::utils::time::to_rfc3339;

use crate::db::WriteHandle;
use crate::idempotency::{delete_record_tx, find_record_tx, insert_record_tx, purge_expired_tx};
use crate::pos::apply_operation_tx;

/// Attempts when the record insert loses a uniqueness race.
const MAX_EXECUTE_ATTEMPTS: usize = 2;

pub struct TransactionExecutor {
    writer: WriteHandle,
    policy: IdempotencyPolicy,
    event_sink: Arc<dyn DomainEventSink>,
}

impl TransactionExecutor {
    pub fn new(writer: WriteHandle, policy: IdempotencyPolicy) -> Self {
        Self {
            writer,
            policy,
            event_sink: Arc::new(NoOpDomainEventSink),
        }
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn DomainEventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    async fn execute_once(
        &self,
        key: String,
        payload: OperationPayload,
        fingerprint: String,
    ) -> Result<(ExecutionOutcome, Vec<EntityChange>)> {
        let policy = self.policy;
        self.writer
            .exec(move |conn| {
                let now = Utc::now();
                let operation_type = payload.operation_type();

                if let Some(existing) = find_record_tx(conn, &key)? {
                    if !existing.is_expired(now) {
                        if !existing.matches(operation_type, &fingerprint) {
                            return Err(Error::Rejected(BusinessRejection::IdempotencyKeyReused {
                                key,
                            }));
                        }
                        return Ok((
                            ExecutionOutcome {
                                operation_type: existing.operation_type,
                                result_snapshot: existing.result_snapshot,
                                replayed: true,
                            },
                            Vec::new(),
                        ));
                    }
                    // Expired: the key starts a new operation.
                    delete_record_tx(conn, &key)?;
                }

                let applied = apply_operation_tx(conn, &payload, now)?;
                let result_snapshot = serde_json::to_string(&applied.result)?;
                insert_record_tx(
                    conn,
                    &IdempotencyRecord {
                        key,
                        operation_type,
                        request_fingerprint: fingerprint,
                        result_snapshot: result_snapshot.clone(),
                        created_at: to_rfc3339(now),
                        expires_at: to_rfc3339(policy.expires_at(now)),
                    },
                )?;

                Ok((
                    ExecutionOutcome {
                        operation_type,
                        result_snapshot,
                        replayed: false,
                    },
                    applied.changes,
                ))
            })
            .await
    }
}

#[async_trait]
impl IdempotentExecutorTrait for TransactionExecutor {
    async fn execute(&self, key: String, payload: OperationPayload) -> Result<ExecutionOutcome> {
        validate_idempotency_key(&key)?;
        payload.validate()?;
        let fingerprint = payload.fingerprint()?;

        let mut attempt = 0;
        let (outcome, changes) = loop {
            attempt += 1;
            match self
                .execute_once(key.clone(), payload.clone(), fingerprint.clone())
                .await
            {
                Err(Error::Database(DatabaseError::UniqueViolation(message)))
                    if attempt < MAX_EXECUTE_ATTEMPTS =>
                {
                    warn!(
                        "[Idempotency] Key {} hit a uniqueness conflict ({}); re-reading",
                        key, message
                    );
                }
                other => break other?,
            }
        };

        if outcome.replayed {
            debug!(
                "[Idempotency] Replayed {} for key {}",
                outcome.operation_type, key
            );
        } else {
            info!(
                "[Idempotency] Executed {} for key {} ({} change(s))",
                outcome.operation_type,
                key,
                changes.len()
            );
            let emitted_at = Utc::now();
            let events = coalesce_changes(changes)
                .into_iter()
                .map(|change| change.into_broadcast(emitted_at))
                .collect::<Vec<_>>();
            if !events.is_empty() {
                self.event_sink.emit(events);
            }
        }

        Ok(outcome)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let removed = self
            .writer
            .exec(|conn| purge_expired_tx(conn, Utc::now()))
            .await?;
        if removed > 0 {
            info!("[Idempotency] Purged {} expired key(s)", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests;
