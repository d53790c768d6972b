//! Connection lifecycle observer

use crate::shared::ConnectionError;

/// Receives lifecycle events from a single connection.
///
/// Methods are invoked from the connection's background tasks and must not
/// block; hand heavy work off to another task.
pub trait ConnectionObserver: Send + Sync {
    /// Once per successful handshake.
    fn on_connected(&self) {}

    /// Once per session teardown; `None` for orderly closes.
    fn on_disconnected(&self, _error: Option<&ConnectionError>) {}

    /// Once per inbound data frame, in receive order, with the raw payload.
    fn on_message(&self, _payload: &[u8]) {}

    /// Any internally observed failure (dial, TLS setup, write, keepalive).
    fn on_error(&self, _error: &ConnectionError) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}
