//! Event system for gadget state notifications
//!
//! Events are broadcast to WebSocket clients and any other subscriber.

pub mod types;

pub use types::SystemEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Event bus for broadcasting gadget events
///
/// `publish` never blocks, so it is safe to call from the FunctionFS
/// watcher thread.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// Events without subscribers are dropped.
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SystemEvent::GadgetReset);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SystemEvent::GadgetReset));
    }

    #[test]
    fn test_publish_from_plain_thread() {
        let bus = std::sync::Arc::new(EventBus::new());
        let mut rx = bus.subscribe();

        let publisher = bus.clone();
        std::thread::spawn(move || {
            publisher.publish(SystemEvent::Error {
                message: "test".to_string(),
            });
        })
        .join()
        .unwrap();

        assert!(matches!(rx.try_recv(), Ok(SystemEvent::Error { .. })));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(SystemEvent::GadgetReset);
    }
}
