//! Event Bus
//!
//! A typed broadcast channel the manager publishes lifecycle and operation
//! events to. Subscribers hold explicit receivers; dropping a receiver is the
//! teardown.

use crate::models::ServiceEvent;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast channel of [`ServiceEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServiceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Open a new subscription. Events published before this call are not
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ServiceEvent) {
        trace!(service_id = event.service_id(), "Publishing service event");
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ServiceEvent::Connected {
            service_id: "s1".to_string(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.service_id(), "s1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(ServiceEvent::Disconnected {
            service_id: "s1".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_all_events() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ServiceEvent::OperationCompleted {
            service_id: "s1".to_string(),
            action: "search".to_string(),
            execution_time_ms: 5,
            timestamp: Utc::now(),
        });

        assert_eq!(rx1.recv().await.unwrap().service_id(), "s1");
        assert_eq!(rx2.recv().await.unwrap().service_id(), "s1");
    }
}
