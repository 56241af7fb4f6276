//! Error types for Synheart Pulse

use thiserror::Error;

/// Errors raised while parsing a single BLE notification payload.
///
/// A decode error only ever costs the frame it was raised for; the session keeps
/// running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty {frame} payload")]
    Empty { frame: &'static str },

    #[error("Truncated {frame} payload: need {needed} bytes, got {actual}")]
    Truncated {
        frame: &'static str,
        needed: usize,
        actual: usize,
    },
}

/// Errors reported by the GATT collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Unable to connect to {0}")]
    Unreachable(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Unknown characteristic: {0}")]
    UnknownCharacteristic(uuid::Uuid),

    #[error("GATT error: {0}")]
    Gatt(String),
}

/// Problems with a configuration value. These never abort anything; the
/// offending key falls back to its default.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Missing configuration key: {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors that can occur while collecting, recording or analysing a session
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Failed to parse value: {0}")]
    ParseError(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}
