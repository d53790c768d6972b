pub mod orchestrator;
pub mod ports;

// Re-export key types for convenience
pub use orchestrator::{ConnectionOrchestrator, StationSettings};
pub use ports::{NoopStationEventHandler, SharedStationEventHandler, StationEventHandler};
