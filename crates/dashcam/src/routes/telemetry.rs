//! Telemetry Routes

use axum::{extract::State, http::StatusCode, Json};
use position::{FixQuality, PositionFix};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use telemetry::{FuelResetState, Margin, TelemetryError, TelemetryState};
use tracing::error;

use crate::AppState;

/// Live read-out
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub engine: EngineReadout,
    pub fuel: FuelReadout,
    pub position: Option<PositionReadout>,
    pub decoder: DecoderReadout,
}

#[derive(Debug, Serialize)]
pub struct EngineReadout {
    pub rpm: Option<f64>,
    pub speed_kph: Option<f64>,
    pub speed_mph: Option<f64>,
    pub coolant_c: Option<f64>,
    pub coolant_f: Option<f64>,
    pub throttle_pct: Option<f64>,
    pub manifold_kpa: Option<f64>,
    pub intake_air_c: Option<f64>,
    pub battery_v: Option<f64>,
    /// `N` or the forward gear number
    pub gear: Option<String>,
    pub mil: Option<bool>,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct FuelReadout {
    pub level_pct: Option<f64>,
    pub flow_lph: Option<f64>,
    /// Consumption with the safety margin applied (L)
    pub consumed_liters: f64,
    /// Consumption with the safety margin applied (US gal)
    pub consumed_gallons: f64,
    /// Integrated consumption before the margin (L)
    pub raw_liters: f64,
    pub safety_margin: f64,
    /// A fuel-system frame has been decoded
    pub valid: bool,
    /// `idle` or `armed`
    pub reset_state: &'static str,
    /// Seconds the refuel detector has been armed
    pub armed_secs: Option<f64>,
    pub has_driven: bool,
}

#[derive(Debug, Serialize)]
pub struct PositionReadout {
    pub lat: f64,
    pub lon: f64,
    pub speed_mph: f64,
    pub heading_deg: Option<f64>,
    pub altitude_m: Option<f64>,
    pub fix: FixQuality,
    pub satellites: Option<u8>,
    pub age_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct DecoderReadout {
    pub profile: &'static str,
    pub decoded: u64,
    pub unknown: u64,
    pub short: u64,
}

fn engine(state: &TelemetryState) -> EngineReadout {
    EngineReadout {
        rpm: state.rpm,
        speed_kph: state.speed_kph,
        speed_mph: state.speed_mph(),
        coolant_c: state.coolant_c,
        coolant_f: state.coolant_f(),
        throttle_pct: state.throttle_pct,
        manifold_kpa: state.manifold_kpa,
        intake_air_c: state.intake_air_c,
        battery_v: state.battery_v,
        gear: state.gear.map(|g| g.to_string()),
        mil: state.mil,
        running: state.is_engine_running(),
    }
}

fn position(fix: PositionFix, now: Instant) -> PositionReadout {
    PositionReadout {
        lat: fix.lat,
        lon: fix.lon,
        speed_mph: fix.speed_mph(),
        heading_deg: fix.heading_deg,
        altitude_m: fix.altitude_m,
        fix: fix.fix,
        satellites: fix.satellites,
        age_ms: now.saturating_duration_since(fix.received_at).as_millis() as u64,
    }
}

/// Get the live telemetry record
pub async fn get_telemetry(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TelemetryResponse>, StatusCode> {
    let now = Instant::now();
    let poisoned = |e: TelemetryError| {
        error!("Telemetry read failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let snapshot = state.telemetry.snapshot().map_err(poisoned)?;
    let (reset_state, has_driven) = state.telemetry.fuel_status().map_err(poisoned)?;

    let (reset_label, armed_secs) = match reset_state {
        FuelResetState::Idle => ("idle", None),
        FuelResetState::ArmedSince(since) => (
            "armed",
            Some(now.saturating_duration_since(since).as_secs_f64()),
        ),
    };

    let fix = match &state.position {
        Some(shared) => shared.snapshot_at(now).unwrap_or_else(|e| {
            error!("Position read failed: {}", e);
            None
        }),
        None => None,
    };

    let stats = state.decoder.stats();

    Ok(Json(TelemetryResponse {
        engine: engine(&snapshot),
        fuel: FuelReadout {
            level_pct: snapshot.fuel_level_pct,
            flow_lph: snapshot.fuel_flow_lph,
            consumed_liters: snapshot.fuel_consumed_liters(Margin::Applied),
            consumed_gallons: snapshot.fuel_consumed_gallons(Margin::Applied),
            raw_liters: snapshot.fuel_consumed_liters(Margin::Raw),
            safety_margin: snapshot.safety_margin(),
            valid: snapshot.has_valid_fuel_data(),
            reset_state: reset_label,
            armed_secs,
            has_driven,
        },
        position: fix.map(|f| position(f, now)),
        decoder: DecoderReadout {
            profile: state.decoder.profile().name,
            decoded: stats.decoded(),
            unknown: stats.unknown(),
            short: stats.short(),
        },
    }))
}
