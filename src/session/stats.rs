//! Per-connection statistics

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ConnectionState;

/// Mutable counters owned by a connection, guarded by its stats lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatsCounters {
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl StatsCounters {
    pub fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
        self.last_message_at = Some(Utc::now());
    }
}

/// Point-in-time copy of a connection's counters and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub station_id: String,
    pub state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Frames waiting in the send queue when the snapshot was taken
    pub queue_depth: usize,
}

impl ConnectionStats {
    pub(crate) fn from_counters(
        station_id: &str,
        state: ConnectionState,
        counters: &StatsCounters,
        reconnect_attempts: u32,
        last_error: Option<String>,
        queue_depth: usize,
    ) -> Self {
        Self {
            station_id: station_id.to_string(),
            state,
            connected_at: counters.connected_at,
            disconnected_at: counters.disconnected_at,
            last_message_at: counters.last_message_at,
            reconnect_attempts,
            last_error,
            messages_sent: counters.messages_sent,
            messages_received: counters.messages_received,
            bytes_sent: counters.bytes_sent,
            bytes_received: counters.bytes_received,
            queue_depth,
        }
    }
}

/// Aggregate view over every connection in a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub connected: usize,
    pub connecting: usize,
    pub reconnecting: usize,
    pub errored: usize,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl<'a> FromIterator<&'a ConnectionStats> for PoolStats {
    fn from_iter<I: IntoIterator<Item = &'a ConnectionStats>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut pool, s| {
            pool.total += 1;
            match s.state {
                ConnectionState::Connected => pool.connected += 1,
                ConnectionState::Connecting => pool.connecting += 1,
                ConnectionState::Reconnecting => pool.reconnecting += 1,
                ConnectionState::Error => pool.errored += 1,
                ConnectionState::Disconnected | ConnectionState::Closed => {}
            }
            pool.messages_sent += s.messages_sent;
            pool.messages_received += s.messages_received;
            pool.bytes_sent += s.bytes_sent;
            pool.bytes_received += s.bytes_received;
            pool
        })
    }
}
