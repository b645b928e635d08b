//! Overlay Compositor
//!
//! Draws the clock, date, recording indicator, speed, position and fuel
//! read-outs over live video. Each element keeps its last rendered plate and
//! is only re-shaped when its value changes beyond the element's change rule,
//! so a steady scene costs one blend per element per tick.

mod compositor;
mod config;
mod element;
mod pacing;
mod plate;

pub use compositor::{blend_plate, Compositor, OverlayInputs};
pub use config::{
    Anchor, ElementConfig, FontSize, FuelUnit, OverlayConfig, SpeedSource, SpeedUnit, StyleConfig,
};
pub use element::{ChangeRule, ElementKind, ElementValue, OverlayElement};
pub use pacing::{FramePacer, PacingConfig, TickDecision};
pub use plate::{render_plate, PlateStyle};

use present_buffer::DisplayError;
use thiserror::Error;

/// Overlay error types
#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Invalid configuration field {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Presentation failed: {0}")]
    Display(#[from] DisplayError),
}
