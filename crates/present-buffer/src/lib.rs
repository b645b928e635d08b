//! Presentation Buffers
//!
//! The compositor's only write target. A [`Display`] owns exactly two pages:
//! the front page is being scanned out while the back page is lent to the
//! compositor as a [`PresentationBuffer`] for one composite-and-present cycle.
//! [`Display::present`] swaps them.

mod buffer;
mod display;
mod format;
mod memory;

#[cfg(target_os = "linux")]
mod fbdev;

pub use buffer::PresentationBuffer;
pub use display::{open_display, Display, DisplayConfig, DisplayDevice, Geometry};
pub use format::PixelFormat;
pub use memory::MemoryDisplay;

#[cfg(target_os = "linux")]
pub use fbdev::FbdevDisplay;

use thiserror::Error;

/// Display error types
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Failed to open display: {0}")]
    Open(String),

    #[error("Unsupported pixel layout: {0}")]
    Unsupported(String),

    #[error("Buffer too small: need {needed} bytes, have {actual}")]
    BufferSize { needed: usize, actual: usize },

    #[error("Source frame is {actual} bytes, expected {expected}")]
    SourceSize { expected: usize, actual: usize },

    #[error("Present failed: {0}")]
    Present(String),

    #[error("Invalid configuration field {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}
