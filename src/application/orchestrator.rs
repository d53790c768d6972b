//! Connection orchestrator
//!
//! Composition layer over the registry: turns station settings into
//! connection configs, wires each connection's observer to the
//! application's [`StationEventHandler`], and sequences registration before
//! startup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use super::ports::SharedStationEventHandler;
use crate::session::{
    station_url, AuthMode, Connection, ConnectionConfig, ConnectionObserver, ConnectionRegistry,
    ConnectionState, ConnectionStats, PoolStats, TlsConfig,
};
use crate::shared::{ConnectionError, RegistryError};

/// Per-station overrides on top of the orchestrator defaults.
#[derive(Debug, Clone, Default)]
pub struct StationSettings {
    pub station_id: String,
    /// Full endpoint URL; defaults to `<base_url>/<station_id>`
    pub url: Option<String>,
    pub protocol_version: Option<String>,
    pub auth: Option<AuthMode>,
    pub tls: Option<TlsConfig>,
}

impl StationSettings {
    pub fn new(station_id: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            ..Self::default()
        }
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Logs locally, then forwards to the system-wide handler.
struct StationObserver {
    station_id: String,
    handler: SharedStationEventHandler,
}

impl ConnectionObserver for StationObserver {
    fn on_connected(&self) {
        info!(station_id = %self.station_id, "🔌 Station connected");
        self.handler.on_connected(&self.station_id);
    }

    fn on_disconnected(&self, error: Option<&ConnectionError>) {
        match error {
            Some(e) => warn!(station_id = %self.station_id, error = %e, "Station disconnected"),
            None => info!(station_id = %self.station_id, "Station disconnected"),
        }
        self.handler.on_disconnected(&self.station_id, error);
    }

    fn on_message(&self, payload: &[u8]) {
        debug!(station_id = %self.station_id, bytes = payload.len(), "📨 Message received");
        self.handler.on_message(&self.station_id, payload);
    }

    fn on_error(&self, error: &ConnectionError) {
        error!(station_id = %self.station_id, error = %error, "Station error");
        self.handler.on_error(&self.station_id, error);
    }
}

/// Manages the emulated station pool.
pub struct ConnectionOrchestrator {
    base_url: String,
    defaults: ConnectionConfig,
    registry: Arc<ConnectionRegistry>,
    handler: SharedStationEventHandler,
    shut_down: AtomicBool,
}

impl ConnectionOrchestrator {
    /// `defaults` supplies timeouts, reconnect policy, queue sizing, TLS and
    /// auth for stations that do not override them.
    pub fn new(
        base_url: impl Into<String>,
        defaults: ConnectionConfig,
        handler: SharedStationEventHandler,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            defaults,
            registry: Arc::new(ConnectionRegistry::new()),
            handler,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Connection config for a station: defaults plus its overrides.
    pub fn build_config(&self, settings: &StationSettings) -> ConnectionConfig {
        let mut config = self.defaults.clone();
        config.station_id = settings.station_id.clone();
        config.url = settings
            .url
            .clone()
            .unwrap_or_else(|| station_url(&self.base_url, &settings.station_id));
        if let Some(version) = &settings.protocol_version {
            config.protocol_version = version.clone();
        }
        if let Some(auth) = &settings.auth {
            config.auth = auth.clone();
        }
        if let Some(tls) = &settings.tls {
            config.tls = tls.clone();
        }
        config
    }

    /// Register a station and connect it.
    ///
    /// If the first connect fails the station is removed again and the
    /// connect error is returned.
    pub async fn add_station(&self, settings: StationSettings) -> Result<(), RegistryError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed.into());
        }
        if settings.station_id.trim().is_empty() {
            return Err(ConnectionError::InvalidRequest("empty station id".to_string()).into());
        }

        let config = self.build_config(&settings);
        let station_id = config.station_id.clone();
        let span = info_span!("station", station_id = %station_id);
        let observer = Arc::new(StationObserver {
            station_id: station_id.clone(),
            handler: self.handler.clone(),
        });

        info!(
            %station_id,
            url = %config.url,
            protocol_version = %config.protocol_version,
            "Adding station"
        );

        let connection = Connection::new(config, observer, span);
        self.registry.add(Arc::new(connection.clone()))?;

        if let Err(e) = connection.connect().await {
            warn!(%station_id, error = %e, "Initial connect failed, removing station");
            if let Err(remove_err) = self.registry.remove(&station_id).await {
                debug!(%station_id, error = %remove_err, "Station already gone");
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn remove_station(&self, station_id: &str) -> Result<(), RegistryError> {
        self.registry.remove(station_id).await
    }

    pub async fn send(
        &self,
        station_id: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), RegistryError> {
        self.registry.send(station_id, payload.into()).await
    }

    pub async fn broadcast(&self, payload: &[u8]) -> Result<(), RegistryError> {
        self.registry.broadcast(payload).await
    }

    pub fn station_ids(&self) -> Vec<String> {
        self.registry.station_ids()
    }

    /// Ids of stations currently in `Connected`, sorted.
    pub fn connected_stations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry
            .get_all()
            .into_iter()
            .filter(|(_, c)| c.state().is_connected())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    pub fn connection_state(&self, station_id: &str) -> Option<ConnectionState> {
        self.registry.get(station_id).ok().map(|c| c.state())
    }

    pub fn station_stats(&self, station_id: &str) -> Option<ConnectionStats> {
        self.registry.get(station_id).ok().map(|c| c.stats())
    }

    pub fn all_stats(&self) -> HashMap<String, ConnectionStats> {
        self.registry.stats()
    }

    pub fn aggregate_stats(&self) -> PoolStats {
        self.registry.stats().values().collect()
    }

    pub async fn disconnect_all(&self) -> Result<(), RegistryError> {
        self.registry.disconnect_all().await
    }

    /// Disconnect everything and refuse new stations. Idempotent.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Orchestrator already shut down");
            return Ok(());
        }
        info!(stations = self.registry.size(), "🛑 Shutting down station pool");
        let result = self.registry.disconnect_all().await;
        info!("Station pool shut down");
        result
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
