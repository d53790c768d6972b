//! Notification events
//!
//! Station lifecycle events published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types for notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// Station completed a WebSocket handshake
    StationConnected(StationConnectedEvent),
    /// Station session ended
    StationDisconnected(StationDisconnectedEvent),
    /// Frame received from the central system
    MessageReceived(MessageReceivedEvent),
    /// Connection-level failure
    StationError(StationErrorEvent),
}

impl Event {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StationConnected(_) => "station_connected",
            Event::StationDisconnected(_) => "station_disconnected",
            Event::MessageReceived(_) => "message_received",
            Event::StationError(_) => "station_error",
        }
    }

    pub fn station_id(&self) -> &str {
        match self {
            Event::StationConnected(e) => &e.station_id,
            Event::StationDisconnected(e) => &e.station_id,
            Event::MessageReceived(e) => &e.station_id,
            Event::StationError(e) => &e.station_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConnectedEvent {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationDisconnectedEvent {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    /// Error text; `None` for an orderly close
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceivedEvent {
    pub station_id: String,
    /// Payload decoded as UTF-8, lossy for binary frames
    pub payload: String,
    pub bytes: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationErrorEvent {
    pub station_id: String,
    pub message: String,
    /// Whether reconnecting may recover from the error
    pub transient: bool,
    pub timestamp: DateTime<Utc>,
}

/// Wrapper for sending events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_message_serializes_with_type_tag() {
        let message = EventMessage::new(Event::StationDisconnected(StationDisconnectedEvent {
            station_id: "CP001".to_string(),
            timestamp: Utc::now(),
            reason: None,
        }));

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "StationDisconnected");
        assert_eq!(json["data"]["station_id"], "CP001");
        assert!(json["id"].is_string());
    }
}
