//! Application ports (hexagonal architecture boundaries)
//!
//! Outbound ports the connection layer reports into live here; adapters such
//! as the notification bus implement them.

pub mod station_events;

pub use station_events::{NoopStationEventHandler, SharedStationEventHandler, StationEventHandler};
