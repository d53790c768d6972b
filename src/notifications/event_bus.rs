//! Event Bus for broadcasting events to subscribers
//!
//! Uses tokio broadcast channel for pub/sub pattern.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{
    Event, EventMessage, MessageReceivedEvent, StationConnectedEvent, StationDisconnectedEvent,
    StationErrorEvent,
};
use crate::application::ports::StationEventHandler;
use crate::shared::ConnectionError;

/// Default channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Event bus for broadcasting events to all subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: Event) {
        let message = EventMessage::new(event);
        let event_type = message.event.event_type();
        let station_id = message.event.station_id().to_string();

        match self.sender.send(message) {
            Ok(subscribers) => {
                debug!(event_type, %station_id, subscribers, "Event published");
            }
            Err(_) => {
                debug!(event_type, %station_id, "Event published (no subscribers)");
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> EventSubscriber {
        let receiver = self.sender.subscribe();
        let total = self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(total, "New event subscriber");

        EventSubscriber {
            receiver,
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    /// Get current subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event subscriber that receives events from the bus
pub struct EventSubscriber {
    receiver: broadcast::Receiver<EventMessage>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventSubscriber {
    /// Receive the next event
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        let prev = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        debug!(remaining = prev.saturating_sub(1), "Event subscriber dropped");
    }
}

/// Shared event bus type
pub type SharedEventBus = Arc<EventBus>;

/// Create a shared event bus
pub fn create_event_bus() -> SharedEventBus {
    Arc::new(EventBus::new())
}

/// Publishes station lifecycle events onto an [`EventBus`].
#[derive(Clone)]
pub struct EventBusHandler {
    bus: SharedEventBus,
}

impl EventBusHandler {
    pub fn new(bus: SharedEventBus) -> Self {
        Self { bus }
    }
}

impl StationEventHandler for EventBusHandler {
    fn on_connected(&self, station_id: &str) {
        self.bus.publish(Event::StationConnected(StationConnectedEvent {
            station_id: station_id.to_string(),
            timestamp: Utc::now(),
        }));
    }

    fn on_disconnected(&self, station_id: &str, error: Option<&ConnectionError>) {
        self.bus.publish(Event::StationDisconnected(StationDisconnectedEvent {
            station_id: station_id.to_string(),
            timestamp: Utc::now(),
            reason: error.map(ToString::to_string),
        }));
    }

    fn on_message(&self, station_id: &str, payload: &[u8]) {
        self.bus.publish(Event::MessageReceived(MessageReceivedEvent {
            station_id: station_id.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            bytes: payload.len(),
            timestamp: Utc::now(),
        }));
    }

    fn on_error(&self, station_id: &str, error: &ConnectionError) {
        self.bus.publish(Event::StationError(StationErrorEvent {
            station_id: station_id.to_string(),
            message: error.to_string(),
            transient: error.is_transient(),
            timestamp: Utc::now(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next(subscriber: &mut EventSubscriber) -> EventMessage {
        tokio::time::timeout(Duration::from_millis(100), subscriber.recv())
            .await
            .expect("Timeout")
            .expect("No message")
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new();
        let mut subscriber = bus.subscribe();

        bus.publish(Event::StationConnected(StationConnectedEvent {
            station_id: "CP001".to_string(),
            timestamp: Utc::now(),
        }));

        let received = next(&mut subscriber).await;
        assert_eq!(received.event.event_type(), "station_connected");
        assert_eq!(received.event.station_id(), "CP001");
    }

    #[test]
    fn test_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let sub1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(sub1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_handler_publishes_station_events() {
        let bus = create_event_bus();
        let mut subscriber = bus.subscribe();
        let handler = EventBusHandler::new(bus.clone());

        handler.on_message("CP001", b"[3,\"1\",{}]");
        handler.on_error("CP001", &ConnectionError::Tls("bad bundle".into()));
        handler.on_disconnected("CP001", None);

        match next(&mut subscriber).await.event {
            Event::MessageReceived(e) => {
                assert_eq!(e.payload, "[3,\"1\",{}]");
                assert_eq!(e.bytes, 10);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next(&mut subscriber).await.event {
            Event::StationError(e) => {
                assert!(!e.transient);
                assert!(e.message.contains("bad bundle"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next(&mut subscriber).await.event {
            Event::StationDisconnected(e) => assert!(e.reason.is_none()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
