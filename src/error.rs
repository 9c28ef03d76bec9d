//! Error types for attention-link

use thiserror::Error;

/// Errors surfaced by the monitor, its configuration and its transport
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Roster error: {0}")]
    RosterError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors returned by [`crate::connection::ConnectionManager::send`].
///
/// Control messages are best-effort, so callers usually log and absorb these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection is not open")]
    NotConnected,

    #[error("failed to encode message: {0}")]
    Encode(String),
}
