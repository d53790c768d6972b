//! Error types for station connections, the registry and configuration

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::session::ConnectionState;

/// Errors raised by a single station connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection is not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("Send queue full, no space within {0:?}")]
    QueueFull(Duration),

    #[error("Connection closed")]
    Closed,

    #[error("TLS configuration: {0}")]
    Tls(String),

    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("No frame received within {0:?}")]
    ReadTimeout(Duration),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Keepalive timed out, peer silent for {0:?}")]
    KeepaliveTimeout(Duration),

    #[error("Gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Whether the reconnect loop may recover from this error on its own.
    ///
    /// Configuration problems (bad TLS material, unusable URL) still go
    /// through the regular reconnect path, but retrying them is not expected
    /// to help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Tls(_) | Self::InvalidRequest(_) | Self::ReconnectExhausted(_) => false,
            Self::WebSocket(err) => !matches!(
                err,
                tungstenite::Error::Url(_) | tungstenite::Error::HttpFormat(_)
            ),
            _ => true,
        }
    }
}

/// Errors raised by the connection registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Already exists: station {0}")]
    AlreadyExists(String),

    #[error("Not found: station {0}")]
    NotFound(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("{failed} of {attempted} stations failed")]
    Partial { failed: usize, attempted: usize },
}

/// Errors raised while loading the runner configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
