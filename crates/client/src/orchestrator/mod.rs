//! Sync orchestrator: owns the pending operation queue and the local entity
//! cache of one device.
//!
//! `enqueue` only touches local storage. `drain` delivers queued operations
//! stream by stream: streams run concurrently, operations inside a stream
//! strictly in enqueue order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;

use tillsync_core::entities::Collection;
use tillsync_core::events::{BroadcastEvent, ChangeAction};
use tillsync_core::operations::{OperationPayload, OperationType};
use tillsync_core::sync::{
    begin_send, merge_patch, next_transition, provisional_change, DeliveryOutcome, DrainReport,
    LocalEntityRecord, LocalEntityStore, NewPendingOperation, PendingOperation,
    PendingOperationStore, QueueAction, StreamDrainResult, StreamPhase, SYNC_INTERVAL_JITTER_MS,
};
use tillsync_core::utils::time::{millis_until_rfc3339, now_rfc3339, to_rfc3339};
use tillsync_storage_sqlite::{
    Database, DatabaseRole, LocalEntityRepository, PendingOperationRepository,
};

use crate::client::{PosApiClient, SyncTransport};
use crate::config::SyncConfig;
use crate::error::Result;

const NOTICE_CHANNEL_CAPACITY: usize = 256;
const MIN_BACKGROUND_DELAY_MS: u64 = 1_000;

/// User-facing sync notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncNotice {
    /// The server refused an operation; it has been removed from the queue.
    #[serde(rename_all = "camelCase")]
    Rejected {
        operation_id: i64,
        operation_type: OperationType,
        stream_key: String,
        code: String,
        message: String,
    },
    /// An operation has failed often enough that the user should know.
    #[serde(rename_all = "camelCase")]
    DeliveryDelayed {
        operation_id: i64,
        stream_key: String,
        retry_count: i32,
        last_error: String,
    },
    #[serde(rename_all = "camelCase")]
    EntityChanged {
        collection: Collection,
        entity_id: String,
    },
    ConnectionChanged { online: bool },
}

#[derive(Debug, Default)]
struct StreamSummary {
    result: Option<StreamDrainResult>,
    replayed: usize,
    deferred: usize,
}

pub struct SyncOrchestrator {
    transport: Arc<dyn SyncTransport>,
    queue: Arc<dyn PendingOperationStore>,
    local: Arc<dyn LocalEntityStore>,
    config: SyncConfig,
    notices: broadcast::Sender<SyncNotice>,
    drain_mutex: Mutex<()>,
    wake: Notify,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        queue: Arc<dyn PendingOperationStore>,
        local: Arc<dyn LocalEntityStore>,
        config: SyncConfig,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            transport,
            queue,
            local,
            config,
            notices,
            drain_mutex: Mutex::new(()),
            wake: Notify::new(),
            background_task: Mutex::new(None),
        }
    }

    /// Open (or create) the device database at `db_path` and talk to the
    /// server configured in `config`.
    pub fn open(db_path: &str, config: SyncConfig) -> Result<Self> {
        let db = Database::open(db_path, DatabaseRole::Client)?;
        let transport = Arc::new(PosApiClient::from_config(&config)?);
        let queue = Arc::new(PendingOperationRepository::new(
            Arc::clone(&db.pool),
            db.writer.clone(),
        ));
        let local = Arc::new(LocalEntityRepository::new(db.pool, db.writer));
        Ok(Self::new(transport, queue, local, config))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.notices.subscribe()
    }

    fn notify(&self, notice: SyncNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    pub(crate) fn notify_connection(&self, online: bool) {
        self.notify(SyncNotice::ConnectionChanged { online });
    }

    /// Ask the background loop to run a drain now.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Local reads
    // ─────────────────────────────────────────────────────────────────────

    pub fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        Ok(self.queue.list_pending()?)
    }

    pub fn get_entity(
        &self,
        collection: Collection,
        entity_id: &str,
    ) -> Result<Option<LocalEntityRecord>> {
        Ok(self.local.get_entity(collection, entity_id)?)
    }

    pub fn list_collection(&self, collection: Collection) -> Result<Vec<LocalEntityRecord>> {
        Ok(self.local.list_collection(collection)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────

    /// Persist an operation and its optimistic local effect. Never touches
    /// the network.
    pub async fn enqueue(&self, payload: OperationPayload) -> Result<PendingOperation> {
        let now = Utc::now();
        let operation = NewPendingOperation::from_payload(payload, now)?;
        let change = provisional_change(&operation.payload)?;
        let existing = self.local.get_entity(change.collection, &change.entity_id)?;
        let provisional = LocalEntityRecord {
            collection: change.collection,
            entity_id: change.entity_id.clone(),
            data: merge_patch(existing.as_ref().map(|r| &r.data), &change.patch),
            last_updated: to_rfc3339(now),
            provisional: true,
            confirmed_data: existing
                .as_ref()
                .and_then(LocalEntityRecord::last_confirmed)
                .cloned(),
        };

        let stored = self.queue.enqueue(operation, Some(provisional)).await?;
        info!(
            "[Sync] Enqueued {} id={} stream={} key={}",
            stored.operation_type.as_str(),
            stored.id,
            stored.stream_key,
            stored.idempotency_key
        );
        self.notify(SyncNotice::EntityChanged {
            collection: change.collection,
            entity_id: change.entity_id,
        });
        self.wake();
        Ok(stored)
    }

    /// Cancel an operation that has never been sent. Returns `false` when the
    /// operation is unknown or was already sent.
    pub async fn cancel(&self, id: i64) -> Result<bool> {
        let Some(operation) = self.queue.get_pending(id)? else {
            return Ok(false);
        };
        if !operation.can_cancel() {
            debug!("[Sync] Operation {} already sent, not cancelling", id);
            return Ok(false);
        }
        if !self.queue.cancel(id).await? {
            return Ok(false);
        }
        info!("[Sync] Cancelled operation {}", id);
        self.restore_entity(&operation.payload).await?;
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Drain
    // ─────────────────────────────────────────────────────────────────────

    /// Deliver every due operation. Only one drain runs at a time.
    pub async fn drain(&self) -> Result<DrainReport> {
        let _cycle = self.drain_mutex.lock().await;
        let started = Instant::now();

        let mut streams: BTreeMap<String, Vec<PendingOperation>> = BTreeMap::new();
        for operation in self.queue.list_pending()? {
            streams
                .entry(operation.stream_key.clone())
                .or_default()
                .push(operation);
        }
        if streams.is_empty() {
            return Ok(DrainReport::default());
        }

        let summaries = join_all(
            streams
                .into_iter()
                .map(|(stream_key, operations)| self.drain_stream(stream_key, operations)),
        )
        .await;

        let mut report = DrainReport::default();
        for summary in summaries {
            let summary = summary?;
            report.replayed += summary.replayed;
            report.deferred += summary.deferred;
            if let Some(result) = summary.result {
                report.delivered += result.delivered;
                report.rejected += result.rejected;
                report.streams.push(result);
            }
        }
        report.duration_ms = started.elapsed().as_millis() as i64;

        info!(
            "[Sync] Drain complete delivered={} replayed={} rejected={} deferred={} streams={} in {}ms",
            report.delivered,
            report.replayed,
            report.rejected,
            report.deferred,
            report.streams.len(),
            report.duration_ms
        );
        Ok(report)
    }

    async fn drain_stream(
        &self,
        stream_key: String,
        operations: Vec<PendingOperation>,
    ) -> Result<StreamSummary> {
        let total = operations.len();
        let head_due = operations
            .first()
            .map(|op| op.is_due(Utc::now()))
            .unwrap_or(false);
        if !head_due {
            debug!("[Sync] Stream {} waiting for backoff", stream_key);
            return Ok(StreamSummary {
                deferred: total,
                ..StreamSummary::default()
            });
        }

        let mut phase = StreamPhase::Idle;
        let mut delivered = 0;
        let mut rejected = 0;
        let mut replayed = 0;
        let mut cancelled = 0;

        for operation in operations {
            let Some(sending) = begin_send(phase) else {
                break;
            };
            // Cancelled since the queue was read: never send it.
            if !self
                .queue
                .mark_attempted(operation.id, now_rfc3339())
                .await?
            {
                debug!(
                    "[Sync] Operation {} was cancelled before sending",
                    operation.id
                );
                cancelled += 1;
                continue;
            }
            phase = sending;

            let outcome = self.transport.deliver(&operation).await;
            let Some(transition) = next_transition(
                phase,
                &operation,
                &outcome,
                Utc::now(),
                self.config.delivery_delay_notice_attempts,
            ) else {
                break;
            };
            self.apply_action(&operation, &outcome, transition.action)
                .await?;

            match &outcome {
                DeliveryOutcome::Delivered { replayed: r, .. } => {
                    delivered += 1;
                    if *r {
                        replayed += 1;
                    }
                }
                DeliveryOutcome::Rejected { .. } => rejected += 1,
                DeliveryOutcome::Transient { .. } => {}
            }

            phase = transition.phase;
            if !transition.continue_stream {
                break;
            }
        }

        Ok(StreamSummary {
            result: Some(StreamDrainResult {
                stream_key,
                final_phase: phase,
                delivered,
                rejected,
                remaining: total - delivered - rejected - cancelled,
            }),
            replayed,
            deferred: 0,
        })
    }

    async fn apply_action(
        &self,
        operation: &PendingOperation,
        outcome: &DeliveryOutcome,
        action: QueueAction,
    ) -> Result<()> {
        match action {
            QueueAction::Remove => {
                self.queue.remove(operation.id).await?;
                let result = match outcome {
                    DeliveryOutcome::Delivered { result, .. } => result,
                    _ => &Value::Null,
                };
                debug!(
                    "[Sync] Delivered {} id={}",
                    operation.operation_type.as_str(),
                    operation.id
                );
                self.confirm_own_write(&operation.payload, result).await
            }
            QueueAction::ScheduleRetry {
                retry_count,
                next_attempt_at,
                last_error,
                notify_delayed,
            } => {
                warn!(
                    "[Sync] Delivery of {} failed (attempt {}), retrying at {}: {}",
                    operation.id, retry_count, next_attempt_at, last_error
                );
                self.queue
                    .schedule_retry(
                        operation.id,
                        retry_count,
                        next_attempt_at,
                        last_error.clone(),
                    )
                    .await?;
                if notify_delayed {
                    self.notify(SyncNotice::DeliveryDelayed {
                        operation_id: operation.id,
                        stream_key: operation.stream_key.clone(),
                        retry_count,
                        last_error,
                    });
                }
                Ok(())
            }
            QueueAction::Reject { code, message } => {
                warn!(
                    "[Sync] Operation {} ({}) rejected: {} {}",
                    operation.id,
                    operation.operation_type.as_str(),
                    code,
                    message
                );
                self.queue.remove(operation.id).await?;
                self.notify(SyncNotice::Rejected {
                    operation_id: operation.id,
                    operation_type: operation.operation_type,
                    stream_key: operation.stream_key.clone(),
                    code,
                    message,
                });
                self.restore_entity(&operation.payload).await
            }
        }
    }

    /// Whether another queued operation still writes to the entity.
    fn has_pending_for(&self, collection: Collection, entity_id: &str) -> Result<bool> {
        for operation in self.queue.list_pending()? {
            let change = provisional_change(&operation.payload)?;
            if change.collection == collection && change.entity_id == entity_id {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Replace the provisional row with the server's result for our write.
    async fn confirm_own_write(&self, payload: &OperationPayload, result: &Value) -> Result<()> {
        let change = provisional_change(payload)?;
        if self.has_pending_for(change.collection, &change.entity_id)? {
            return Ok(());
        }
        if !result.is_object() {
            return self.refetch_entity(change.collection, &change.entity_id).await;
        }
        self.local
            .upsert_entities(vec![LocalEntityRecord::confirmed(
                change.collection,
                change.entity_id.clone(),
                result.clone(),
                now_rfc3339(),
            )])
            .await?;
        self.notify(SyncNotice::EntityChanged {
            collection: change.collection,
            entity_id: change.entity_id,
        });
        Ok(())
    }

    /// Undo the optimistic effect of an operation that will never apply.
    async fn restore_entity(&self, payload: &OperationPayload) -> Result<()> {
        let change = provisional_change(payload)?;
        if self.has_pending_for(change.collection, &change.entity_id)? {
            return Ok(());
        }
        self.refetch_entity(change.collection, &change.entity_id)
            .await
    }

    async fn refetch_entity(&self, collection: Collection, entity_id: &str) -> Result<()> {
        match self.transport.fetch_entity(collection, entity_id).await {
            Ok(Some(data)) => {
                self.local
                    .upsert_entities(vec![LocalEntityRecord::confirmed(
                        collection,
                        entity_id,
                        data,
                        now_rfc3339(),
                    )])
                    .await?
            }
            Ok(None) => self.local.remove_entity(collection, entity_id).await?,
            Err(err) => {
                // Offline: fall back to the last server copy. Rows the server
                // never confirmed are dropped.
                debug!(
                    "[Sync] Could not refetch {}/{}: {}",
                    collection, entity_id, err
                );
                let fallback = self
                    .local
                    .get_entity(collection, entity_id)?
                    .and_then(|row| {
                        let data = row.last_confirmed()?.clone();
                        Some(LocalEntityRecord::confirmed(
                            collection,
                            entity_id,
                            data,
                            row.last_updated,
                        ))
                    });
                match fallback {
                    Some(record) => self.local.upsert_entities(vec![record]).await?,
                    None => self.local.remove_entity(collection, entity_id).await?,
                }
            }
        }
        self.notify(SyncNotice::EntityChanged {
            collection,
            entity_id: entity_id.to_string(),
        });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────

    /// Pull the full snapshot of `collection` into the local store.
    pub async fn reconcile_collection(&self, collection: Collection) -> Result<usize> {
        let items = self.transport.fetch_collection(collection).await?;
        let refreshed_at = now_rfc3339();
        let records: Vec<LocalEntityRecord> = items
            .into_iter()
            .filter_map(|item| {
                let entity_id = item.get("id").and_then(Value::as_str)?.to_string();
                Some(LocalEntityRecord::confirmed(
                    collection,
                    entity_id,
                    item,
                    refreshed_at.clone(),
                ))
            })
            .collect();
        let count = records.len();
        self.local
            .replace_collection(collection, records, refreshed_at)
            .await?;
        debug!("[Sync] Reconciled {} ({} entities)", collection, count);
        Ok(count)
    }

    /// Reconcile every tracked collection.
    pub async fn reconcile_all(&self) -> Result<()> {
        for collection in self.config.tracked_collections.clone() {
            self.reconcile_collection(collection).await?;
        }
        Ok(())
    }

    /// Reconcile tracked collections not refreshed within the staleness
    /// threshold. Returns how many were refreshed.
    pub async fn refresh_stale(&self) -> Result<usize> {
        let now = Utc::now();
        let mut refreshed = 0;
        for collection in self.config.tracked_collections.clone() {
            let state = self.local.collection_state(collection)?;
            if state.is_stale(now, self.config.staleness_threshold) {
                self.reconcile_collection(collection).await?;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    /// React to a change notification by re-reading the entity from the
    /// server. Entities with an unconfirmed local write are left alone.
    pub async fn apply_broadcast(&self, event: BroadcastEvent) -> Result<()> {
        let collection = event.data_type;
        if !self.config.tracked_collections.contains(&collection) {
            return Ok(());
        }
        if let Some(existing) = self.local.get_entity(collection, &event.entity_id)? {
            if existing.provisional {
                debug!(
                    "[Sync] Ignoring broadcast for provisional {}/{}",
                    collection, event.entity_id
                );
                return Ok(());
            }
        }

        match event.action {
            ChangeAction::Delete => {
                self.local
                    .remove_entity(collection, &event.entity_id)
                    .await?
            }
            ChangeAction::Create | ChangeAction::Update => {
                match self
                    .transport
                    .fetch_entity(collection, &event.entity_id)
                    .await?
                {
                    Some(data) => {
                        self.local
                            .upsert_entities(vec![LocalEntityRecord::confirmed(
                                collection,
                                event.entity_id.clone(),
                                data,
                                now_rfc3339(),
                            )])
                            .await?
                    }
                    None => {
                        self.local
                            .remove_entity(collection, &event.entity_id)
                            .await?
                    }
                }
            }
        }
        self.notify(SyncNotice::EntityChanged {
            collection,
            entity_id: event.entity_id,
        });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Background loop
    // ─────────────────────────────────────────────────────────────────────

    /// Delay until the next cycle: the drain interval plus jitter, shortened
    /// when a retry comes due earlier.
    fn next_cycle_delay(&self) -> Duration {
        let jitter_ms = if SYNC_INTERVAL_JITTER_MS > 0 {
            rand::thread_rng().gen_range(0..SYNC_INTERVAL_JITTER_MS)
        } else {
            0
        };
        let mut delay_ms = (self.config.drain_interval.as_millis() as u64).saturating_add(jitter_ms);

        if let Ok(pending) = self.queue.list_pending() {
            let earliest = pending
                .iter()
                .filter_map(|op| op.next_attempt_at.as_deref())
                .filter_map(millis_until_rfc3339)
                .min();
            if let Some(wait_ms) = earliest {
                delay_ms = delay_ms.min(wait_ms.saturating_add(jitter_ms));
            }
        }
        Duration::from_millis(delay_ms.max(MIN_BACKGROUND_DELAY_MS))
    }

    async fn run_cycle(&self) {
        if let Err(err) = self.drain().await {
            warn!("[Sync] Background drain failed: {}", err);
        }
        if let Err(err) = self.refresh_stale().await {
            debug!("[Sync] Stale refresh skipped: {}", err);
        }
    }

    /// Start the periodic drain/refresh loop. A running loop is kept.
    pub async fn start_background_sync(self: &Arc<Self>) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("[Sync] Background sync started");
            loop {
                orchestrator.run_cycle().await;
                let delay = orchestrator.next_cycle_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = orchestrator.wake.notified() => {
                        debug!("[Sync] Woken early");
                    }
                }
            }
        });
        *guard = Some(handle);
    }

    pub async fn stop_background_sync(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            info!("[Sync] Background sync stopped");
        }
    }

    pub async fn is_background_running(&self) -> bool {
        self.background_task
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}
