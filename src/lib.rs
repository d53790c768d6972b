//! # Texnouz OCPP Charge Point Emulator
//!
//! Connection core for emulating fleets of OCPP charge points against a
//! central system over OCPP-J (WebSocket).
//!
//! ## Architecture
//!
//! - **domain**: OCPP protocol versions and subprotocol mapping
//! - **session**: per-station WebSocket connection state machine and the
//!   connection registry
//! - **application**: orchestration of the station pool and the event port
//!   embedding applications implement
//! - **notifications**: broadcast bus carrying station lifecycle events
//! - **shared**: errors, reconnect backoff, shutdown coordination

pub mod application;
pub mod config;
pub mod domain;
pub mod notifications;
pub mod session;
pub mod shared;

pub use config::{config_path, default_config_path, AppConfig};

pub use application::{ConnectionOrchestrator, StationEventHandler, StationSettings};
pub use session::{
    Connection, ConnectionConfig, ConnectionRegistry, ConnectionState, ConnectionStats,
    PoolStats,
};
pub use shared::{ConnectionError, RegistryError};

// Re-export notifications
pub use notifications::{create_event_bus, Event, EventBus, EventBusHandler, SharedEventBus};
