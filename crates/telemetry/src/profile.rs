//! Vehicle Decoder Tables
//!
//! Each supported vehicle is a static table mapping a bus identifier to a
//! pure decode routine and the minimum payload length it needs. Adding a
//! vehicle means adding a table, not a new type.

use crate::error::TelemetryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte-to-unit scaling factors. These differ between vehicles and model
/// years and are calibrated in the field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalingConfig {
    /// Engine speed per raw bit (rpm)
    pub rpm_per_bit: f64,
    /// Vehicle speed per raw bit (km/h)
    pub speed_kph_per_bit: f64,
    /// Offset added to raw temperature bytes (degC)
    pub temperature_offset_c: f64,
    /// Raw throttle value that means 100 %
    pub throttle_full_scale: f64,
    /// Raw fuel level value that means 100 %
    pub fuel_level_full_scale: f64,
    /// Fuel flow per raw bit (L/h)
    pub fuel_flow_lph_per_bit: f64,
    /// Battery voltage per raw bit (V)
    pub battery_volts_per_bit: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            rpm_per_bit: 0.25,
            speed_kph_per_bit: 0.01,
            temperature_offset_c: -40.0,
            throttle_full_scale: 255.0,
            fuel_level_full_scale: 255.0,
            fuel_flow_lph_per_bit: 0.01,
            battery_volts_per_bit: 0.001,
        }
    }
}

impl ScalingConfig {
    /// Reject non-finite or non-positive factors
    pub fn validate(&self) -> Result<(), TelemetryError> {
        let positive = [
            ("vehicle.scaling.rpm_per_bit", self.rpm_per_bit),
            ("vehicle.scaling.speed_kph_per_bit", self.speed_kph_per_bit),
            ("vehicle.scaling.throttle_full_scale", self.throttle_full_scale),
            ("vehicle.scaling.fuel_level_full_scale", self.fuel_level_full_scale),
            ("vehicle.scaling.fuel_flow_lph_per_bit", self.fuel_flow_lph_per_bit),
            ("vehicle.scaling.battery_volts_per_bit", self.battery_volts_per_bit),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TelemetryError::InvalidConfig {
                    field,
                    reason: format!("must be finite and > 0, got {}", value),
                });
            }
        }

        if !self.temperature_offset_c.is_finite() {
            return Err(TelemetryError::InvalidConfig {
                field: "vehicle.scaling.temperature_offset_c",
                reason: "must be finite".to_string(),
            });
        }

        Ok(())
    }
}

/// Transmission gear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gear {
    /// Park or neutral
    Neutral,
    /// Forward gear 1-6
    Forward(u8),
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gear::Neutral => write!(f, "N"),
            Gear::Forward(n) => write!(f, "{}", n),
        }
    }
}

/// Fields extracted from one frame, applied to the state as one unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldGroup {
    /// Engine speed and road speed
    EngineSpeed {
        /// Engine speed (rpm)
        rpm: f64,
        /// Road speed (km/h)
        speed_kph: f64,
    },
    /// Coolant temperature (degC)
    Coolant {
        /// Coolant temperature (degC)
        coolant_c: f64,
    },
    /// Throttle and intake data
    EngineData {
        /// Throttle opening (%)
        throttle_pct: f64,
        /// Manifold absolute pressure (kPa)
        manifold_kpa: f64,
        /// Intake air temperature (degC)
        intake_air_c: f64,
    },
    /// Selected gear, `None` when the raw value is out of range
    Transmission {
        /// Gear, if recognised
        gear: Option<Gear>,
    },
    /// Tank level and instantaneous consumption
    FuelSystem {
        /// Tank level (%, clamped to 0-100)
        level_pct: f64,
        /// Fuel flow (L/h, never negative)
        flow_lph: f64,
    },
    /// Body control module status
    Body {
        /// Malfunction indicator lamp lit
        mil: bool,
        /// Battery voltage, present only in long frames
        battery_v: Option<f64>,
    },
}

impl FieldGroup {
    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FieldGroup::EngineSpeed { .. } => "engine_speed",
            FieldGroup::Coolant { .. } => "coolant",
            FieldGroup::EngineData { .. } => "engine_data",
            FieldGroup::Transmission { .. } => "transmission",
            FieldGroup::FuelSystem { .. } => "fuel_system",
            FieldGroup::Body { .. } => "body",
        }
    }
}

/// One decoder table entry
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    /// Bus identifier
    pub id: u32,
    /// Minimum payload length
    pub min_len: usize,
    /// Pure decode routine, only called with `payload.len() >= min_len`
    pub decode: fn(&[u8], &ScalingConfig) -> FieldGroup,
}

/// A named decoder table
#[derive(Debug)]
pub struct VehicleProfile {
    /// Profile name used in configuration
    pub name: &'static str,
    /// Known frames
    pub frames: &'static [FrameSpec],
}

impl VehicleProfile {
    /// Look up a built-in profile by its configuration name
    pub fn by_name(name: &str) -> Result<&'static VehicleProfile, TelemetryError> {
        PROFILES
            .iter()
            .copied()
            .find(|p| p.name == name)
            .ok_or_else(|| TelemetryError::UnknownProfile(name.to_string()))
    }

    /// Names of all built-in profiles
    pub fn names() -> impl Iterator<Item = &'static str> {
        PROFILES.iter().map(|p| p.name)
    }

    /// Table entry for an identifier
    pub fn lookup(&self, id: u32) -> Option<&FrameSpec> {
        self.frames.iter().find(|spec| spec.id == id)
    }

    /// All identifiers this profile decodes, for receive filters
    pub fn identifiers(&self) -> Vec<u32> {
        self.frames.iter().map(|spec| spec.id).collect()
    }
}

static PROFILES: &[&VehicleProfile] = &[&CAMARO_2013_LFX];

/// 2013 Camaro, LFX engine, GM high-speed CAN (500 kbps, 11-bit ids)
pub static CAMARO_2013_LFX: VehicleProfile = VehicleProfile {
    name: "camaro_2013_lfx",
    frames: &[
        FrameSpec { id: 0x0C9, min_len: 4, decode: gm_engine_speed },
        FrameSpec { id: 0x0F1, min_len: 1, decode: gm_coolant },
        FrameSpec { id: 0x110, min_len: 3, decode: gm_engine_data },
        FrameSpec { id: 0x1E9, min_len: 1, decode: gm_transmission },
        FrameSpec { id: 0x3D1, min_len: 3, decode: gm_fuel_system },
        FrameSpec { id: 0x4C1, min_len: 1, decode: gm_body },
    ],
};

#[inline]
fn be16(bytes: &[u8], at: usize) -> f64 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]]) as f64
}

fn gm_engine_speed(data: &[u8], scale: &ScalingConfig) -> FieldGroup {
    FieldGroup::EngineSpeed {
        rpm: be16(data, 0) * scale.rpm_per_bit,
        speed_kph: be16(data, 2) * scale.speed_kph_per_bit,
    }
}

fn gm_coolant(data: &[u8], scale: &ScalingConfig) -> FieldGroup {
    FieldGroup::Coolant {
        coolant_c: data[0] as f64 + scale.temperature_offset_c,
    }
}

fn gm_engine_data(data: &[u8], scale: &ScalingConfig) -> FieldGroup {
    FieldGroup::EngineData {
        throttle_pct: (data[0] as f64 / scale.throttle_full_scale * 100.0).clamp(0.0, 100.0),
        manifold_kpa: data[1] as f64,
        intake_air_c: data[2] as f64 + scale.temperature_offset_c,
    }
}

fn gm_transmission(data: &[u8], _scale: &ScalingConfig) -> FieldGroup {
    let gear = match data[0] {
        0 => Some(Gear::Neutral),
        n @ 1..=6 => Some(Gear::Forward(n)),
        _ => None,
    };
    FieldGroup::Transmission { gear }
}

fn gm_fuel_system(data: &[u8], scale: &ScalingConfig) -> FieldGroup {
    FieldGroup::FuelSystem {
        level_pct: (data[0] as f64 / scale.fuel_level_full_scale * 100.0).clamp(0.0, 100.0),
        flow_lph: (be16(data, 1) * scale.fuel_flow_lph_per_bit).max(0.0),
    }
}

fn gm_body(data: &[u8], scale: &ScalingConfig) -> FieldGroup {
    FieldGroup::Body {
        mil: data[0] & 0x01 != 0,
        battery_v: (data.len() >= 6).then(|| be16(data, 4) * scale.battery_volts_per_bit),
    }
}
