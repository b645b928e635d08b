//! Position Error Types

use thiserror::Error;

/// Position ingest errors
#[derive(Debug, Error)]
pub enum PositionError {
    /// Could not reach the position daemon
    #[error("Failed to connect to position daemon: {0}")]
    Connect(String),

    /// Daemon closed the connection
    #[error("Position daemon disconnected")]
    Disconnected,

    /// Report could not be parsed
    #[error("Malformed position report: {0}")]
    Parse(String),

    /// Socket I/O error
    #[error("Position I/O error: {0}")]
    Io(String),

    /// A writer panicked while holding the position lock
    #[error("Position lock poisoned")]
    LockPoisoned,

    /// Configuration field out of range
    #[error("Invalid configuration field {field}: {reason}")]
    InvalidConfig {
        /// Dotted field path
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl From<std::io::Error> for PositionError {
    fn from(err: std::io::Error) -> Self {
        PositionError::Io(err.to_string())
    }
}
