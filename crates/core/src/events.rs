//! Change notifications emitted after a transaction commits.
//!
//! A [`BroadcastEvent`] is a pointer to changed state, never a copy of it:
//! receivers re-fetch the referenced entity.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::Collection;
use crate::utils::time::to_rfc3339;

/// SSE event name carrying a JSON [`BroadcastEvent`].
pub const CHANGE_EVENT_NAME: &str = "change";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// An entity touched inside a transaction, recorded before commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityChange {
    pub collection: Collection,
    pub action: ChangeAction,
    pub entity_id: String,
}

impl EntityChange {
    pub fn new(collection: Collection, action: ChangeAction, entity_id: impl Into<String>) -> Self {
        Self {
            collection,
            action,
            entity_id: entity_id.into(),
        }
    }

    pub fn into_broadcast(self, emitted_at: DateTime<Utc>) -> BroadcastEvent {
        BroadcastEvent {
            data_type: self.collection,
            action: self.action,
            entity_id: self.entity_id,
            emitted_at: to_rfc3339(emitted_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    pub data_type: Collection,
    pub action: ChangeAction,
    pub entity_id: String,
    pub emitted_at: String,
}

/// Receives committed changes. Runtimes (SSE bus, tests) implement this.
pub trait DomainEventSink: Send + Sync {
    fn emit(&self, events: Vec<BroadcastEvent>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDomainEventSink;

impl DomainEventSink for NoOpDomainEventSink {
    fn emit(&self, _events: Vec<BroadcastEvent>) {}
}

/// Sink that keeps every emitted event, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<BroadcastEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BroadcastEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl DomainEventSink for RecordingEventSink {
    fn emit(&self, events: Vec<BroadcastEvent>) {
        if let Ok(mut guard) = self.events.lock() {
            guard.extend(events);
        }
    }
}

/// Collapse duplicate changes for the same entity, keeping first-seen order.
/// A create followed by updates stays a create.
pub fn coalesce_changes(changes: Vec<EntityChange>) -> Vec<EntityChange> {
    let mut out: Vec<EntityChange> = Vec::with_capacity(changes.len());
    for change in changes {
        match out
            .iter_mut()
            .find(|c| c.collection == change.collection && c.entity_id == change.entity_id)
        {
            Some(existing) => {
                if change.action == ChangeAction::Delete {
                    existing.action = ChangeAction::Delete;
                }
            }
            None => out.push(change),
        }
    }
    out
}
