use tokio::sync::broadcast;

use larder_protocol::ChangeEvent;

/// Local bus that republishes server-originated change events to whatever
/// UI contexts are currently interested. Contexts subscribe and unsubscribe
/// independently; zero subscribers just means nothing is delivered.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to all current subscribers; returns how many
    /// received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Number of contexts currently listening.
    pub fn interested(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
