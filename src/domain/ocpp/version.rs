//! OCPP protocol version
//!
//! Maps the configured protocol version of a station onto the WebSocket
//! subprotocol it offers during the handshake.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported OCPP protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OcppVersion {
    /// OCPP 1.6 (JSON / OCPP-J)
    #[default]
    V16,
    /// OCPP 2.0.1
    V201,
    /// OCPP 2.1
    V21,
}

impl OcppVersion {
    /// WebSocket subprotocol identifier for this OCPP version.
    ///
    /// Sent in the `Sec-WebSocket-Protocol` header during handshake.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::V16 => "ocpp1.6",
            Self::V201 => "ocpp2.0.1",
            Self::V21 => "ocpp2.1",
        }
    }

    /// Resolve a configured version string ("1.6", "2.0.1", "2.1").
    ///
    /// Anything unrecognised falls back to OCPP 1.6.
    pub fn from_version_str(s: &str) -> Self {
        match s.trim() {
            "2.0.1" => Self::V201,
            "2.1" => Self::V21,
            _ => Self::V16,
        }
    }

    /// Human-readable version string.
    pub fn version_string(&self) -> &'static str {
        match self {
            Self::V16 => "1.6",
            Self::V201 => "2.0.1",
            Self::V21 => "2.1",
        }
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCPP {}", self.version_string())
    }
}

/// Subprotocol a station offers for the configured protocol version.
pub fn subprotocol_for(version: &str) -> &'static str {
    OcppVersion::from_version_str(version).subprotocol()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_versions_map_to_their_subprotocol() {
        assert_eq!(subprotocol_for("1.6"), "ocpp1.6");
        assert_eq!(subprotocol_for("2.0.1"), "ocpp2.0.1");
        assert_eq!(subprotocol_for("2.1"), "ocpp2.1");
    }

    #[test]
    fn unknown_version_falls_back_to_16() {
        assert_eq!(subprotocol_for("unknown"), "ocpp1.6");
        assert_eq!(subprotocol_for(""), "ocpp1.6");
        assert_eq!(subprotocol_for("2.0"), "ocpp1.6");
    }

    #[test]
    fn display_uses_version_string() {
        assert_eq!(OcppVersion::V201.to_string(), "OCPP 2.0.1");
    }
}
