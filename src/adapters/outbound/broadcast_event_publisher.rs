//! Broadcast Event Publisher
//!
//! Fans domain events out over a tokio broadcast channel and logs each one.
//! Publishing never blocks and never fails: with no subscriber the event is
//! only logged, and slow subscribers lag instead of stalling writers.

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

pub struct BroadcastEventPublisher {
    event_tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: DomainEvent) {
        tracing::debug!(
            "event {} for id {} by {}",
            event.name(),
            event.payload.entity_id(),
            event.doer.username
        );
        // Err only means nobody is listening
        let _ = self.event_tx.send(event);
    }
}
