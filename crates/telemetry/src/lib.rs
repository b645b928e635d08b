//! Vehicle Telemetry Engine
//!
//! Decodes vehicle bus frames through a per-vehicle table into one shared
//! [`TelemetryState`], integrating fuel flow into cumulative consumption and
//! detecting refuels with an auto-reset state machine.
//!
//! Readers never hold the lock while formatting: [`SharedTelemetry::snapshot`]
//! copies the record and releases immediately.

mod decoder;
mod error;
mod fuel;
mod profile;
mod state;

pub use decoder::{DecodeStats, Decoder};
pub use error::{DecodeError, TelemetryError};
pub use fuel::{FuelConfig, FuelEngine, FuelEvent, FuelResetState};
pub use profile::{FieldGroup, FrameSpec, Gear, ScalingConfig, VehicleProfile, CAMARO_2013_LFX};
pub use state::{Margin, SharedTelemetry, TelemetryState};

/// Liters per US gallon
pub const LITERS_PER_GALLON: f64 = 3.78541;

/// Miles per kilometre
pub const MILES_PER_KM: f64 = 0.621371;
