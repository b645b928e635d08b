//! Telemetry Error Types

use thiserror::Error;

/// Errors raised by the shared telemetry state and its configuration
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A writer panicked while holding the telemetry lock
    #[error("Telemetry lock poisoned")]
    LockPoisoned,

    /// No built-in decoder table has this name
    #[error("Unknown vehicle profile: {0}")]
    UnknownProfile(String),

    /// A configuration field is out of range
    #[error("Invalid configuration field {field}: {reason}")]
    InvalidConfig {
        /// Dotted field path
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Errors returned by [`crate::Decoder::decode`]. None of them are fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Known identifier with a payload shorter than its table entry requires
    #[error("Frame 0x{id:03X} has {len} bytes, needs {required}")]
    ShortPayload {
        /// Frame identifier
        id: u32,
        /// Received payload length
        len: usize,
        /// Minimum length from the decoder table
        required: usize,
    },

    /// The telemetry lock was poisoned, the frame was dropped
    #[error("Telemetry state poisoned")]
    StatePoisoned,
}
