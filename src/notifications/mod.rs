//! Notifications module
//!
//! Station lifecycle events on a broadcast bus, for consumers that live
//! outside the connection layer (message dispatch, dashboards, audit logs).
//!
//! # Usage
//! ```ignore
//! use std::sync::Arc;
//! use texnouz_emulator::notifications::{create_event_bus, EventBusHandler};
//!
//! let bus = create_event_bus();
//! let mut events = bus.subscribe();
//! let handler = Arc::new(EventBusHandler::new(bus.clone()));
//! // hand `handler` to ConnectionOrchestrator::new
//! ```

pub mod event_bus;
pub mod events;

pub use event_bus::{create_event_bus, EventBus, EventBusHandler, EventSubscriber, SharedEventBus};
pub use events::*;
