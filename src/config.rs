//! Configuration module
//!
//! Runner configuration loaded from TOML
//! (`~/.config/texnouz-emulator/config.toml` unless `EMULATOR_CONFIG` points
//! elsewhere). Every section is optional; missing values fall back to the
//! connection defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::StationSettings;
use crate::session::{AuthMode, ConnectionConfig, TlsConfig};
use crate::shared::{ConfigError, ReconnectBackoff};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "EMULATOR_CONFIG";

/// `~/.config/texnouz-emulator/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("texnouz-emulator")
        .join("config.toml")
}

/// Config path from `EMULATOR_CONFIG`, or the default location.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub central_system: CentralSystemConfig,
    pub defaults: DefaultsConfig,
    pub tls: TlsSection,
    pub runner: RunnerConfig,
    pub stations: Vec<StationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `texnouz_emulator=debug`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralSystemConfig {
    /// Base endpoint; station ids are appended as the last path segment
    pub url: String,
    /// Protocol version for stations that do not set their own
    pub protocol_version: String,
}

impl Default for CentralSystemConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9000/ocpp".to_string(),
            protocol_version: "1.6".to_string(),
        }
    }
}

/// Connection tuning shared by all stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_reconnect_attempts: u32,
    pub send_queue_capacity: usize,
    pub send_timeout_ms: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        let base = ConnectionConfig::default();
        Self {
            connect_timeout_secs: base.connect_timeout.as_secs(),
            read_timeout_secs: base.read_timeout.as_secs(),
            write_timeout_secs: base.write_timeout.as_secs(),
            keepalive_interval_secs: base.keepalive_interval.as_secs(),
            keepalive_timeout_secs: base.keepalive_timeout.as_secs(),
            reconnect_base_ms: base.reconnect_backoff.base.as_millis() as u64,
            reconnect_max_ms: base.reconnect_backoff.max.as_millis() as u64,
            max_reconnect_attempts: base.max_reconnect_attempts,
            send_queue_capacity: base.send_queue_capacity,
            send_timeout_ms: base.send_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    pub enabled: bool,
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

impl From<&TlsSection> for TlsConfig {
    fn from(section: &TlsSection) -> Self {
        Self {
            enabled: section.enabled,
            ca_cert_path: section.ca_cert.clone(),
            client_cert_path: section.client_cert.clone(),
            client_key_path: section.client_key.clone(),
            insecure_skip_verify: section.insecure_skip_verify,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Upper bound for disconnecting the pool on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

/// One `[[stations]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationEntry {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthSection {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl From<AuthSection> for AuthMode {
    fn from(section: AuthSection) -> Self {
        match section {
            AuthSection::None => AuthMode::None,
            AuthSection::Basic { username, password } => AuthMode::Basic { username, password },
            AuthSection::Bearer { token } => AuthMode::Bearer { token },
        }
    }
}

impl AppConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.central_system.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "central_system.url must start with ws:// or wss://, got {url:?}"
            )));
        }
        if self.defaults.send_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "defaults.send_queue_capacity must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for station in &self.stations {
            let id = station.id.trim();
            if id.is_empty() {
                return Err(ConfigError::Invalid("station id must not be empty".to_string()));
            }
            if !seen.insert(id) {
                return Err(ConfigError::Invalid(format!("duplicate station id {id:?}")));
            }
        }
        Ok(())
    }

    /// Connection template applied to every station.
    pub fn connection_defaults(&self) -> ConnectionConfig {
        let d = &self.defaults;
        ConnectionConfig::default()
            .with_protocol_version(self.central_system.protocol_version.clone())
            .with_timeouts(
                Duration::from_secs(d.connect_timeout_secs),
                Duration::from_secs(d.read_timeout_secs),
                Duration::from_secs(d.write_timeout_secs),
            )
            .with_keepalive(
                Duration::from_secs(d.keepalive_interval_secs),
                Duration::from_secs(d.keepalive_timeout_secs),
            )
            .with_reconnect(
                ReconnectBackoff::new(
                    Duration::from_millis(d.reconnect_base_ms),
                    Duration::from_millis(d.reconnect_max_ms),
                ),
                d.max_reconnect_attempts,
            )
            .with_send_queue(d.send_queue_capacity, Duration::from_millis(d.send_timeout_ms))
            .with_tls(TlsConfig::from(&self.tls))
    }

    pub fn station_settings(&self) -> Vec<StationSettings> {
        self.stations
            .iter()
            .map(|entry| StationSettings {
                station_id: entry.id.trim().to_string(),
                url: entry.url.clone(),
                protocol_version: entry.protocol_version.clone(),
                auth: entry.auth.clone().map(AuthMode::from),
                tls: None,
            })
            .collect()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.shutdown_timeout_secs)
    }
}
