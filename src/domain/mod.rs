pub mod ocpp;

pub use ocpp::{subprotocol_for, OcppVersion};
