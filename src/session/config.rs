//! Per-station connection configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::ocpp::subprotocol_for;
use crate::shared::ReconnectBackoff;

/// Default bounded send queue capacity
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 100;
/// Default time `send` waits for queue space
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// How a station authenticates during the WebSocket handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    None,
    /// `Authorization: Basic base64(username:password)`
    Basic { username: String, password: String },
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
}

/// TLS material for `wss://` sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub enabled: bool,
    /// PEM bundle with additional trusted roots
    pub ca_cert_path: Option<PathBuf>,
    /// PEM client certificate, used together with `client_key_path`
    pub client_cert_path: Option<PathBuf>,
    /// PEM (PKCS#8) client private key
    pub client_key_path: Option<PathBuf>,
    /// Accept any server certificate and hostname
    pub insecure_skip_verify: bool,
}

/// Everything a single station connection needs to dial and stay alive.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub station_id: String,
    /// Full WebSocket URL including the station path segment
    pub url: String,
    /// Application protocol version ("1.6", "2.0.1", "2.1")
    pub protocol_version: String,

    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,

    pub reconnect_backoff: ReconnectBackoff,
    /// Attempts after an unexpected disconnect before entering `Error`.
    /// Zero disables reconnection.
    pub max_reconnect_attempts: u32,

    pub send_queue_capacity: usize,
    pub send_timeout: Duration,

    pub tls: TlsConfig,
    pub auth: AuthMode,
}

impl ConnectionConfig {
    pub fn new(station_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Subprotocol offered in the handshake, derived from the protocol version.
    pub fn subprotocol(&self) -> &'static str {
        subprotocol_for(&self.protocol_version)
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_reconnect(mut self, backoff: ReconnectBackoff, max_attempts: u32) -> Self {
        self.reconnect_backoff = backoff;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_timeout = timeout;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration, write: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    pub fn with_send_queue(mut self, capacity: usize, timeout: Duration) -> Self {
        self.send_queue_capacity = capacity;
        self.send_timeout = timeout;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            station_id: String::new(),
            url: String::new(),
            protocol_version: "1.6".to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            reconnect_backoff: ReconnectBackoff::default(),
            max_reconnect_attempts: 10,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            tls: TlsConfig::default(),
            auth: AuthMode::None,
        }
    }
}

/// Join a central system base URL and a station id into the station endpoint.
pub fn station_url(base_url: &str, station_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), station_id)
}
