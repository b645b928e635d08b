//! Position Ingest
//!
//! Reads position reports from gpsd on a background thread and keeps the
//! latest fix in a [`SharedPosition`] that the compositor snapshots once per
//! tick. This crate never disciplines the system clock.

mod error;
mod fix;
mod gpsd;
mod service;

pub use error::PositionError;
pub use fix::{FixQuality, PositionFix, SharedPosition};
pub use gpsd::{GpsdSource, Report};
pub use service::{PositionConfig, PositionService, PositionSource};

/// Metres per second to miles per hour
pub const MPS_TO_MPH: f64 = 2.23694;

/// Metres per second to kilometres per hour
pub const MPS_TO_KPH: f64 = 3.6;
