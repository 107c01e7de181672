//! Push channel listener.
//!
//! Subscribes to the server's change stream and applies each event through
//! the orchestrator. While the stream cannot be opened it polls the pull
//! endpoints instead. Every (re)connect starts with a full reconcile, since
//! events sent while disconnected are gone.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use tillsync_core::events::{BroadcastEvent, CHANGE_EVENT_NAME};
use tillsync_core::sync::{PUSH_KEEP_ALIVE_SECS, PUSH_RECONNECT_DELAY_SECS};

use crate::client::PosApiClient;
use crate::error::Result;
use crate::orchestrator::SyncOrchestrator;
use crate::sse::SseDecoder;

/// Missed keep-alives before the stream is considered dead.
const KEEP_ALIVE_MISSES: u64 = 3;

pub struct PushListener {
    client: PosApiClient,
    orchestrator: Arc<SyncOrchestrator>,
    online: Option<bool>,
}

impl PushListener {
    pub fn new(client: PosApiClient, orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            client,
            orchestrator,
            online: None,
        }
    }

    /// Run the listener on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn set_online(&mut self, online: bool) {
        if self.online != Some(online) {
            self.online = Some(online);
            self.orchestrator.notify_connection(online);
        }
    }

    /// Listen forever. Abort the task to stop.
    pub async fn run(mut self) {
        let poll_interval = self.orchestrator.config().poll_interval;
        loop {
            match self.client.open_event_stream().await {
                Ok(response) => {
                    info!("[Push] Connected to {}", self.client.base_url());
                    self.set_online(true);
                    self.reconcile_after_connect().await;

                    match self.consume(response).await {
                        Ok(()) => info!("[Push] Stream closed by server"),
                        Err(err) => warn!("[Push] Stream dropped: {}", err),
                    }
                    tokio::time::sleep(Duration::from_secs(PUSH_RECONNECT_DELAY_SECS)).await;
                }
                Err(err) => {
                    debug!(
                        "[Push] Push channel unavailable ({}), polling every {}s",
                        err,
                        poll_interval.as_secs()
                    );
                    self.poll_once().await;
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    async fn reconcile_after_connect(&self) {
        if let Err(err) = self.orchestrator.reconcile_all().await {
            warn!("[Push] Reconcile after connect failed: {}", err);
        }
        self.orchestrator.wake();
    }

    async fn poll_once(&mut self) {
        match self.orchestrator.reconcile_all().await {
            Ok(()) => {
                self.set_online(true);
                self.orchestrator.wake();
            }
            Err(err) => {
                debug!("[Push] Poll failed: {}", err);
                self.set_online(false);
            }
        }
    }

    async fn consume(&self, response: reqwest::Response) -> Result<()> {
        let idle_limit = Duration::from_secs(PUSH_KEEP_ALIVE_SECS * KEEP_ALIVE_MISSES);
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let chunk = match tokio::time::timeout(idle_limit, stream.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => return Ok(()),
                Err(_) => {
                    warn!("[Push] No data for {}s, reconnecting", idle_limit.as_secs());
                    return Ok(());
                }
            };

            for frame in decoder.push(&chunk) {
                if frame.event != CHANGE_EVENT_NAME {
                    continue;
                }
                match serde_json::from_str::<BroadcastEvent>(&frame.data) {
                    Ok(event) => {
                        debug!(
                            "[Push] {:?} {}/{}",
                            event.action, event.data_type, event.entity_id
                        );
                        if let Err(err) = self.orchestrator.apply_broadcast(event).await {
                            warn!("[Push] Failed to apply change: {}", err);
                        }
                    }
                    Err(err) => warn!("[Push] Ignoring malformed change event: {}", err),
                }
            }
        }
    }
}
