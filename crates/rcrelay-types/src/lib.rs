use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Which external vision behaviour the server currently treats as active.
///
/// Only one mode is ever active; selecting a mode replaces the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    #[default]
    None,
    /// Face tracking.
    Face,
    /// Red-object tracking.
    Red,
}

impl AiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiMode::None => "none",
            AiMode::Face => "face",
            AiMode::Red => "red",
        }
    }
}

impl std::fmt::Display for AiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide server status, owned by the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// `true` once the servo board has been attached at startup.
    pub has_arduino: bool,
    pub has_camera: bool,
    #[serde(rename = "currentAI")]
    pub current_ai: AiMode,
}

/// Outbound `robot status` payload fanned out to every connected observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotStatus {
    /// Either an enriched status mapping or a plain notice string.
    pub data: Value,
}

/// Error type shared by every rcrelay crate.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Session is no longer running")]
    SessionClosed,
}

impl RelayError {
    /// Convenience constructor for [`RelayError::HardwareFault`].
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }
}
