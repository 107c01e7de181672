//! In-process event bus feeding the SSE change stream.

use tokio::sync::broadcast;
use tracing::debug;

use tillsync_core::events::{BroadcastEvent, DomainEventSink};

const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    /// Publish to every open stream. Dropped silently when nobody listens.
    pub fn publish(&self, event: BroadcastEvent) {
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!("Published change event to {} subscribers", receivers);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainEventSink for EventBus {
    fn emit(&self, events: Vec<BroadcastEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_core::entities::Collection;
    use tillsync_core::events::ChangeAction;

    fn event(id: &str) -> BroadcastEvent {
        BroadcastEvent {
            data_type: Collection::Products,
            action: ChangeAction::Update,
            entity_id: id.to_string(),
            emitted_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_emitted_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(vec![event("p-1"), event("p-2")]);

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.expect("first").entity_id, "p-1");
            assert_eq!(rx.recv().await.expect("second").entity_id, "p-2");
        }
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventBus::new().publish(event("p-1"));
    }
}
