//! Queue-changed notification channel.

use tokio::sync::broadcast;

/// Payload-less token broadcast after every externally visible queue
/// mutation. Subscribers re-derive counts and lists by re-querying the
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueChanged;

const CHANNEL_CAPACITY: usize = 64;

/// Broadcast bus for queue-changed notifications.
///
/// 0..N subscribers; publishing with no live subscribers is not an error,
/// and a lagging subscriber only loses intermediate tokens, never the
/// ability to re-query current state.
pub struct QueueEvents {
    tx: broadcast::Sender<QueueChanged>,
}

impl QueueEvents {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to queue-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueChanged> {
        self.tx.subscribe()
    }

    /// Publish a queue-changed token to all subscribers.
    pub fn publish(&self) {
        let _ = self.tx.send(QueueChanged);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for QueueEvents {
    fn default() -> Self {
        Self::new()
    }
}
