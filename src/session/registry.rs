//! Connection registry
//!
//! Maps station ids to live connections. All mutation goes through one
//! `RwLock`; bulk operations snapshot the map under the lock and do their
//! network work after releasing it, so a slow station never blocks lookups.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{Connection, ConnectionState, ConnectionStats};
use crate::shared::{ConnectionError, RegistryError};

/// The operations the registry and orchestrator need from a station session.
#[async_trait]
pub trait StationConnection: Send + Sync {
    fn station_id(&self) -> &str;
    fn state(&self) -> ConnectionState;
    fn stats(&self) -> ConnectionStats;
    async fn connect(&self) -> Result<(), ConnectionError>;
    async fn disconnect(&self) -> Result<(), ConnectionError>;
    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError>;
}

pub type SharedConnection = Arc<dyn StationConnection>;

#[async_trait]
impl StationConnection for Connection {
    fn station_id(&self) -> &str {
        Connection::station_id(self)
    }

    fn state(&self) -> ConnectionState {
        Connection::state(self)
    }

    fn stats(&self) -> ConnectionStats {
        Connection::stats(self)
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        Connection::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        Connection::disconnect(self).await
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        Connection::send(self, payload).await
    }
}

/// Thread-safe station id -> connection map.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, SharedConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its station id.
    pub fn add(&self, connection: SharedConnection) -> Result<(), RegistryError> {
        let station_id = connection.station_id().to_string();
        let mut connections = self.connections.write();
        if connections.contains_key(&station_id) {
            return Err(RegistryError::AlreadyExists(station_id));
        }
        connections.insert(station_id.clone(), connection);
        let total = connections.len();
        drop(connections);

        info!(%station_id, total, "Connection registered");
        Ok(())
    }

    /// Unregister a station and disconnect it.
    ///
    /// The entry is gone before the disconnect starts; disconnect failures
    /// are logged and do not fail the removal.
    pub async fn remove(&self, station_id: &str) -> Result<(), RegistryError> {
        let connection = self
            .connections
            .write()
            .remove(station_id)
            .ok_or_else(|| RegistryError::NotFound(station_id.to_string()))?;

        if let Err(e) = connection.disconnect().await {
            warn!(station_id, error = %e, "Disconnect during removal failed");
        }
        info!(station_id, "Connection removed");
        Ok(())
    }

    pub fn get(&self, station_id: &str) -> Result<SharedConnection, RegistryError> {
        self.connections
            .read()
            .get(station_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(station_id.to_string()))
    }

    /// Copy of the current map; later registry changes do not affect it.
    pub fn get_all(&self) -> HashMap<String, SharedConnection> {
        self.connections.read().clone()
    }

    /// Send a payload to one station.
    pub async fn send(&self, station_id: &str, payload: Vec<u8>) -> Result<(), RegistryError> {
        let connection = self.get(station_id)?;
        connection.send(payload).await?;
        Ok(())
    }

    /// Send a payload to every connected station.
    ///
    /// Stations that are not connected are skipped. Individual failures are
    /// logged; if any occurred the result reports how many.
    pub async fn broadcast(&self, payload: &[u8]) -> Result<(), RegistryError> {
        let targets: Vec<SharedConnection> = self
            .connections
            .read()
            .values()
            .filter(|c| c.state().is_connected())
            .cloned()
            .collect();

        let attempted = targets.len();
        let mut failed = 0;
        for connection in targets {
            if let Err(e) = connection.send(payload.to_vec()).await {
                failed += 1;
                warn!(station_id = connection.station_id(), error = %e, "Broadcast send failed");
            }
        }

        debug!(attempted, failed, "Broadcast finished");
        if failed > 0 {
            return Err(RegistryError::Partial { failed, attempted });
        }
        Ok(())
    }

    /// Empty the registry and disconnect every former entry.
    pub async fn disconnect_all(&self) -> Result<(), RegistryError> {
        let drained = std::mem::take(&mut *self.connections.write());
        let attempted = drained.len();

        let results = futures_util::future::join_all(drained.into_iter().map(
            |(station_id, connection)| async move {
                let result = connection.disconnect().await;
                if let Err(e) = &result {
                    warn!(%station_id, error = %e, "Disconnect failed");
                }
                result
            },
        ))
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(attempted, failed, "All connections disconnected");
        if failed > 0 {
            return Err(RegistryError::Partial { failed, attempted });
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.connections.read().len()
    }

    pub fn has(&self, station_id: &str) -> bool {
        self.connections.read().contains_key(station_id)
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.state().is_connected())
            .count()
    }

    pub fn station_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stats snapshot of every registered station.
    pub fn stats(&self) -> HashMap<String, ConnectionStats> {
        self.connections
            .read()
            .iter()
            .map(|(id, c)| (id.clone(), c.stats()))
            .collect()
    }
}
