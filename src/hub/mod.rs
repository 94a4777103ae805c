//! Fan-out of phase events to connected observers.
//!
//! No queuing beyond each subscriber's own bounded channel, no replay: a
//! subscriber that is not ready to receive is skipped for that event and
//! the publisher never blocks or learns about it. Events reach every
//! subscriber in the order they were published.

pub mod events;

pub use events::{LogLevel, PhaseEvent};

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Per-subscriber channel capacity; a subscriber this far behind starts
/// missing events rather than stalling the pipeline.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

#[derive(Default)]
struct HubInner {
    next_id: u64,
    subscribers: Vec<(u64, mpsc::Sender<PhaseEvent>)>,
}

#[derive(Clone, Default)]
pub struct BroadcastHub {
    inner: Arc<Mutex<HubInner>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<PhaseEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, tx));
        (SubscriberId(id), rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .retain(|(sub_id, _)| *sub_id != id.0);
    }

    /// Sends `event` to every current subscriber.
    ///
    /// Best-effort at-most-once: a full channel skips this event for that
    /// subscriber, a closed channel drops the subscription entirely.
    pub fn publish(&self, event: PhaseEvent) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|(id, tx)| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(subscriber = *id, "subscriber not keeping up, event skipped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Phase;

    fn log_event(text: &str) -> PhaseEvent {
        PhaseEvent::Log {
            phase: Phase::P2,
            text: text.to_string(),
            level: LogLevel::Info,
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_in_publish_order() {
        let hub = BroadcastHub::new();
        let (_id_a, mut rx_a) = hub.subscribe();
        let (_id_b, mut rx_b) = hub.subscribe();

        hub.publish(log_event("one"));
        hub.publish(log_event("two"));

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(matches!(first, PhaseEvent::Log { text, .. } if text == "one"));
            assert!(matches!(second, PhaseEvent::Log { text, .. } if text == "two"));
        }
    }

    #[tokio::test]
    async fn unsubscribed_observers_stop_receiving() {
        let hub = BroadcastHub::new();
        let (id, mut rx) = hub.subscribe();
        hub.unsubscribe(id);
        hub.publish(log_event("after"));
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_publish() {
        let hub = BroadcastHub::new();
        let (_id, rx) = hub.subscribe();
        drop(rx);
        hub.publish(log_event("into the void"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscribers_miss_events_without_blocking_publish() {
        let hub = BroadcastHub::new();
        let (_id, mut rx) = hub.subscribe();

        for i in 0..(SUBSCRIBER_BUFFER + 50) {
            hub.publish(log_event(&i.to_string()));
        }

        // The subscriber stayed connected and holds exactly one buffer's
        // worth; the overflow was skipped, not queued.
        assert_eq!(hub.subscriber_count(), 1);
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
    }
}
