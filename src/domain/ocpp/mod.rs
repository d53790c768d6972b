//! OCPP protocol shared types

pub mod version;

pub use version::{subprotocol_for, OcppVersion};
