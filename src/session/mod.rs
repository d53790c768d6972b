//! Session management - station WebSocket connections and their registry

pub mod config;
pub mod connection;
pub mod observer;
pub mod queue;
pub mod registry;
mod request;
pub mod state;
pub mod stats;
mod tls;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{
    station_url, AuthMode, ConnectionConfig, TlsConfig, DEFAULT_SEND_QUEUE_CAPACITY,
    DEFAULT_SEND_TIMEOUT,
};
pub use connection::Connection;
pub use observer::{ConnectionObserver, NoopObserver};
pub use queue::OutboundFrame;
pub use registry::{ConnectionRegistry, SharedConnection, StationConnection};
pub use state::ConnectionState;
pub use stats::{ConnectionStats, PoolStats};
