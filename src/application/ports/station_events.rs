//! Station event port
//!
//! [`StationEventHandler`] is the contract between the connection layer and
//! whatever the embedding application does with station traffic (message
//! dispatch, UI notifications, audit logging). The orchestrator forwards
//! every connection's lifecycle events to one handler, tagged with the
//! station id.

use std::sync::Arc;

use crate::shared::ConnectionError;

/// System-wide receiver of station lifecycle events.
///
/// Called from connection tasks; implementations must return quickly.
pub trait StationEventHandler: Send + Sync {
    fn on_connected(&self, _station_id: &str) {}

    fn on_disconnected(&self, _station_id: &str, _error: Option<&ConnectionError>) {}

    fn on_message(&self, _station_id: &str, _payload: &[u8]) {}

    fn on_error(&self, _station_id: &str, _error: &ConnectionError) {}
}

pub type SharedStationEventHandler = Arc<dyn StationEventHandler>;

/// Handler that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStationEventHandler;

impl StationEventHandler for NoopStationEventHandler {}
