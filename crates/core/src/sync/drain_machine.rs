//! Per-stream drain state machine.
//!
//! A stream moves `Idle -> Sending -> Succeeded | RetryableFailure |
//! TerminalFailure`. [`next_transition`] is pure: the orchestrator performs
//! the network call, then asks this module what to do with the queue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::pending_model::PendingOperation;
use super::retry::backoff_seconds;
use crate::utils::time::to_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Idle,
    Sending,
    Succeeded,
    RetryableFailure,
    TerminalFailure,
}

/// What the transport observed for one send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// 2xx. `replayed` mirrors the server's replay marker.
    Delivered {
        replayed: bool,
        result: serde_json::Value,
    },
    /// Network error, timeout, or retryable status. Outcome unknown.
    Transient { reason: String },
    /// The server refused the operation; resending it unchanged cannot help.
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
}

/// Queue mutation the orchestrator must apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    Remove,
    ScheduleRetry {
        retry_count: i32,
        next_attempt_at: String,
        last_error: String,
        notify_delayed: bool,
    },
    Reject {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTransition {
    pub phase: StreamPhase,
    pub action: QueueAction,
    /// Whether the next operation of the same stream may be sent now.
    pub continue_stream: bool,
}

/// Start sending the head of a stream. Only an idle stream can send.
pub fn begin_send(phase: StreamPhase) -> Option<StreamPhase> {
    match phase {
        StreamPhase::Idle | StreamPhase::Succeeded | StreamPhase::TerminalFailure => {
            Some(StreamPhase::Sending)
        }
        StreamPhase::Sending | StreamPhase::RetryableFailure => None,
    }
}

/// Decide the queue action for `operation` given what the transport saw.
/// Only a stream in `Sending` has an outcome to act on; any other phase
/// yields `None`.
///
/// A transient failure halts the stream so later operations never overtake
/// an undelivered one. A rejection removes the operation and lets the stream
/// continue; dependants that cannot succeed are rejected in turn.
pub fn next_transition(
    phase: StreamPhase,
    operation: &PendingOperation,
    outcome: &DeliveryOutcome,
    now: DateTime<Utc>,
    delay_notice_attempts: i32,
) -> Option<StreamTransition> {
    if phase != StreamPhase::Sending {
        return None;
    }
    let transition = match outcome {
        DeliveryOutcome::Delivered { .. } => StreamTransition {
            phase: StreamPhase::Succeeded,
            action: QueueAction::Remove,
            continue_stream: true,
        },
        DeliveryOutcome::Transient { reason } => {
            let retry_count = operation.retry_count.saturating_add(1);
            let delay = backoff_seconds(operation.retry_count);
            StreamTransition {
                phase: StreamPhase::RetryableFailure,
                action: QueueAction::ScheduleRetry {
                    retry_count,
                    next_attempt_at: to_rfc3339(now + Duration::seconds(delay)),
                    last_error: reason.clone(),
                    notify_delayed: retry_count == delay_notice_attempts,
                },
                continue_stream: false,
            }
        }
        DeliveryOutcome::Rejected { code, message, .. } => StreamTransition {
            phase: StreamPhase::TerminalFailure,
            action: QueueAction::Reject {
                code: code.clone(),
                message: message.clone(),
            },
            continue_stream: true,
        },
    };
    Some(transition)
}

/// Per-stream summary of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDrainResult {
    pub stream_key: String,
    pub final_phase: StreamPhase,
    pub delivered: usize,
    pub rejected: usize,
    pub remaining: usize,
}

/// Totals for one drain pass across all streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub delivered: usize,
    pub replayed: usize,
    pub rejected: usize,
    pub deferred: usize,
    pub streams: Vec<StreamDrainResult>,
    pub duration_ms: i64,
}

impl DrainReport {
    pub fn is_idle(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn has_backlog(&self) -> bool {
        self.streams.iter().any(|s| s.remaining > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{OperationPayload, SessionOpenInput};
    use crate::sync::pending_model::NewPendingOperation;
    use crate::utils::time::parse_rfc3339;
    use rust_decimal_macros::dec;

    fn op(retry_count: i32) -> PendingOperation {
        let new = NewPendingOperation::from_payload(
            OperationPayload::SessionOpen(SessionOpenInput {
                session_id: "s-1".to_string(),
                opening_float: dec!(50),
            }),
            Utc::now(),
        )
        .expect("new op");
        PendingOperation {
            id: 7,
            idempotency_key: new.idempotency_key,
            operation_type: new.operation_type,
            stream_key: new.stream_key,
            method: new.method,
            target_endpoint: new.target_endpoint,
            payload: new.payload,
            enqueued_at: new.enqueued_at,
            retry_count,
            next_attempt_at: None,
            first_attempt_at: None,
            last_error: None,
        }
    }

    #[test]
    fn delivered_removes_and_continues() {
        let t = next_transition(
            StreamPhase::Sending,
            &op(0),
            &DeliveryOutcome::Delivered {
                replayed: true,
                result: serde_json::json!({"id": "s-1"}),
            },
            Utc::now(),
            6,
        )
        .expect("transition");
        assert_eq!(t.phase, StreamPhase::Succeeded);
        assert_eq!(t.action, QueueAction::Remove);
        assert!(t.continue_stream);
    }

    #[test]
    fn transient_failure_halts_stream_with_backoff() {
        let now = Utc::now();
        let t = next_transition(
            StreamPhase::Sending,
            &op(2),
            &DeliveryOutcome::Transient {
                reason: "timeout".to_string(),
            },
            now,
            6,
        )
        .expect("transition");
        assert_eq!(t.phase, StreamPhase::RetryableFailure);
        assert!(!t.continue_stream);
        match t.action {
            QueueAction::ScheduleRetry {
                retry_count,
                next_attempt_at,
                notify_delayed,
                ..
            } => {
                assert_eq!(retry_count, 3);
                assert!(!notify_delayed);
                let at = parse_rfc3339(&next_attempt_at).expect("ts");
                assert_eq!((at - now).num_seconds(), 20);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn delay_notice_fires_once_at_threshold() {
        let transient = DeliveryOutcome::Transient {
            reason: "offline".to_string(),
        };
        let notices: Vec<bool> = (0..10)
            .map(|n| {
                match next_transition(StreamPhase::Sending, &op(n), &transient, Utc::now(), 6)
                    .map(|t| t.action)
                {
                    Some(QueueAction::ScheduleRetry { notify_delayed, .. }) => notify_delayed,
                    _ => false,
                }
            })
            .collect();
        assert_eq!(notices.iter().filter(|n| **n).count(), 1);
        assert!(notices[5]);
    }

    #[test]
    fn rejection_is_terminal_but_stream_continues() {
        let t = next_transition(
            StreamPhase::Sending,
            &op(0),
            &DeliveryOutcome::Rejected {
                status: 422,
                code: "INSUFFICIENT_STOCK".to_string(),
                message: "only 1 left".to_string(),
            },
            Utc::now(),
            6,
        )
        .expect("transition");
        assert_eq!(t.phase, StreamPhase::TerminalFailure);
        assert!(matches!(t.action, QueueAction::Reject { ref code, .. } if code == "INSUFFICIENT_STOCK"));
        assert!(t.continue_stream);
    }

    #[test]
    fn sending_stream_cannot_start_another_send() {
        assert_eq!(begin_send(StreamPhase::Idle), Some(StreamPhase::Sending));
        assert_eq!(begin_send(StreamPhase::Sending), None);
        assert_eq!(begin_send(StreamPhase::RetryableFailure), None);
    }

    #[test]
    fn outcomes_only_apply_to_a_sending_stream() {
        let delivered = DeliveryOutcome::Delivered {
            replayed: false,
            result: serde_json::Value::Null,
        };
        for phase in [
            StreamPhase::Idle,
            StreamPhase::Succeeded,
            StreamPhase::RetryableFailure,
            StreamPhase::TerminalFailure,
        ] {
            assert_eq!(next_transition(phase, &op(0), &delivered, Utc::now(), 6), None);
        }
    }
}
