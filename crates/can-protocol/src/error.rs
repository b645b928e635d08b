//! CAN Ingress Error Types

use thiserror::Error;

/// Errors that can occur while receiving bus frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Identifier does not fit in 29 bits
    #[error("Identifier 0x{0:X} exceeds 29 bits")]
    InvalidIdentifier(u32),

    /// Payload longer than a classic CAN frame
    #[error("Payload of {0} bytes exceeds 8 bytes")]
    PayloadTooLong(usize),

    /// Interface or replay file could not be opened
    #[error("Failed to open bus source: {0}")]
    Open(String),

    /// Socket or file I/O error
    #[error("Bus I/O error: {0}")]
    Io(String),

    /// A line or datagram could not be parsed as a frame
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Source has no more frames (end of replay)
    #[error("Bus source closed")]
    Closed,
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Io(err.to_string())
    }
}
