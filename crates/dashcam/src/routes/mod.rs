//! API Routes

pub mod fuel;
pub mod telemetry;
