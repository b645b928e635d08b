//! CAN Bus Frame Ingress
//!
//! This crate provides the receive side of the vehicle bus: the immutable
//! [`BusFrame`] model, the [`FrameSource`] trait implemented by SocketCAN and
//! candump replay sources, and one receive thread per bus channel that hands
//! every frame to a [`FrameSink`] inline.
//!
//! There is deliberately no transmit path: no type in this crate can put a
//! frame on the bus.

mod channel;
mod error;
mod frame;
mod source;

#[cfg(target_os = "linux")]
mod socketcan;

pub use channel::{BusChannel, ChannelConfig, ChannelSource, FrameSink};
pub use error::ProtocolError;
pub use frame::{BusFrame, MAX_PAYLOAD};
pub use source::{open_source, FrameSource, ReplaySource};

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanSource;

/// Identifier limits
pub mod id {
    /// Largest 11-bit standard identifier
    pub const STANDARD_MAX: u32 = 0x7FF;
    /// Largest 29-bit extended identifier
    pub const EXTENDED_MAX: u32 = 0x1FFF_FFFF;
}
