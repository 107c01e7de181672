//! Local entity store model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::entities::Collection;
use crate::errors::Result;
use crate::operations::OperationPayload;
use crate::utils::time::parse_rfc3339;

/// Denormalized copy of a server entity. Never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEntityRecord {
    pub collection: Collection,
    pub entity_id: String,
    pub data: Value,
    pub last_updated: String,
    /// Written optimistically by `enqueue`, not yet confirmed by the server.
    pub provisional: bool,
    /// Server copy behind a provisional row. `None` when the server has
    /// never confirmed the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_data: Option<Value>,
}

impl LocalEntityRecord {
    pub fn confirmed(
        collection: Collection,
        entity_id: impl Into<String>,
        data: Value,
        last_updated: impl Into<String>,
    ) -> Self {
        Self {
            collection,
            entity_id: entity_id.into(),
            data,
            last_updated: last_updated.into(),
            provisional: false,
            confirmed_data: None,
        }
    }

    /// Latest data the server has confirmed for this entity, if any.
    pub fn last_confirmed(&self) -> Option<&Value> {
        if self.provisional {
            self.confirmed_data.as_ref()
        } else {
            Some(&self.data)
        }
    }

    /// Staleness only schedules a refresh; stale records are still shown.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        is_older_than(Some(&self.last_updated), now, threshold)
    }
}

/// Refresh bookkeeping for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionState {
    pub collection: Collection,
    pub last_refreshed_at: Option<String>,
}

impl CollectionState {
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        is_older_than(self.last_refreshed_at.as_deref(), now, threshold)
    }
}

fn is_older_than(timestamp: Option<&str>, now: DateTime<Utc>, threshold: Duration) -> bool {
    match timestamp.map(parse_rfc3339) {
        Some(Ok(at)) => now - at > threshold,
        _ => true,
    }
}

/// Entity touched by an operation plus the fields it is expected to set.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionalChange {
    pub collection: Collection,
    pub entity_id: String,
    pub patch: Value,
}

/// Derive the optimistic local effect of an operation. Amounts the server
/// computes (totals, expected cash, charges) are left for the server.
pub fn provisional_change(payload: &OperationPayload) -> Result<ProvisionalChange> {
    let change = match payload {
        OperationPayload::ProductUpsert(input) => ProvisionalChange {
            collection: Collection::Products,
            entity_id: input.product_id.clone(),
            patch: json!({
                "id": input.product_id,
                "name": input.name,
                "price": input.price,
                "stock": input.stock,
            }),
        },
        OperationPayload::OrderCreate(input) => ProvisionalChange {
            collection: Collection::Orders,
            entity_id: input.order_id.clone(),
            patch: json!({
                "id": input.order_id,
                "cashSessionId": input.cash_session_id,
                "paymentMethod": input.payment_method,
                "lines": input.lines,
            }),
        },
        OperationPayload::SessionOpen(input) => ProvisionalChange {
            collection: Collection::CashSessions,
            entity_id: input.session_id.clone(),
            patch: json!({
                "id": input.session_id,
                "status": "open",
                "openingFloat": input.opening_float,
            }),
        },
        OperationPayload::SessionClose(input) => ProvisionalChange {
            collection: Collection::CashSessions,
            entity_id: input.session_id.clone(),
            patch: json!({
                "id": input.session_id,
                "status": "closed",
                "countedCash": input.counted_cash,
            }),
        },
        OperationPayload::CutCreate(input) => ProvisionalChange {
            collection: Collection::Cuts,
            entity_id: input.cut_id.clone(),
            patch: json!({
                "id": input.cut_id,
                "cashSessionId": input.session_id,
                "countedAmount": input.counted_amount,
                "note": input.note,
            }),
        },
        OperationPayload::CoworkingStart(input) => ProvisionalChange {
            collection: Collection::CoworkingSessions,
            entity_id: input.coworking_session_id.clone(),
            patch: json!({
                "id": input.coworking_session_id,
                "customerName": input.customer_name,
                "hourlyRate": input.hourly_rate,
                "status": "active",
                "startedAt": input.started_at,
            }),
        },
        OperationPayload::CoworkingEnd(input) => ProvisionalChange {
            collection: Collection::CoworkingSessions,
            entity_id: input.coworking_session_id.clone(),
            patch: json!({
                "id": input.coworking_session_id,
                "status": "ended",
                "endedAt": input.ended_at,
            }),
        },
    };
    Ok(change)
}

/// Shallow merge of `patch` over `existing`.
pub fn merge_patch(existing: Option<&Value>, patch: &Value) -> Value {
    let mut merged = match existing {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(fields) = patch {
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}
