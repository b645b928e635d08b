//! Shared Telemetry State
//!
//! One mutex guards the telemetry record together with the fuel engine, so a
//! fuel-system frame updates level, flow, consumption and the refuel detector
//! as a single unit. Readers copy the record out and format the copy.

use crate::error::TelemetryError;
use crate::fuel::{FuelConfig, FuelEngine, FuelEvent, FuelResetState};
use crate::profile::{FieldGroup, Gear};
use crate::{LITERS_PER_GALLON, MILES_PER_KM};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{error, info};

/// Whether the safety margin is applied to reported consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Margin {
    /// Multiply by the configured safety margin (what drivers see)
    Applied,
    /// Raw integrated value
    Raw,
}

/// Live vehicle metrics. Anything not yet received is `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryState {
    /// Engine speed (rpm)
    pub rpm: Option<f64>,
    /// Road speed (km/h)
    pub speed_kph: Option<f64>,
    /// Coolant temperature (degC)
    pub coolant_c: Option<f64>,
    /// Throttle opening (%)
    pub throttle_pct: Option<f64>,
    /// Manifold absolute pressure (kPa)
    pub manifold_kpa: Option<f64>,
    /// Intake air temperature (degC)
    pub intake_air_c: Option<f64>,
    /// Battery voltage (V)
    pub battery_v: Option<f64>,
    /// Selected gear
    pub gear: Option<Gear>,
    /// Malfunction indicator lamp
    pub mil: Option<bool>,
    /// Tank level (%)
    pub fuel_level_pct: Option<f64>,
    /// Instantaneous fuel flow (L/h)
    pub fuel_flow_lph: Option<f64>,
    pub(crate) fuel_consumed_liters: f64,
    pub(crate) last_fuel_sample: Option<Instant>,
    pub(crate) last_update: Option<Instant>,
    pub(crate) has_fuel_data: bool,
    safety_margin: f64,
}

impl TelemetryState {
    /// Empty record
    pub fn new(safety_margin: f64) -> Self {
        Self {
            rpm: None,
            speed_kph: None,
            coolant_c: None,
            throttle_pct: None,
            manifold_kpa: None,
            intake_air_c: None,
            battery_v: None,
            gear: None,
            mil: None,
            fuel_level_pct: None,
            fuel_flow_lph: None,
            fuel_consumed_liters: 0.0,
            last_fuel_sample: None,
            last_update: None,
            has_fuel_data: false,
            safety_margin,
        }
    }

    /// Assign the fields carried by one decoded frame
    pub(crate) fn apply(&mut self, group: &FieldGroup) {
        match *group {
            FieldGroup::EngineSpeed { rpm, speed_kph } => {
                self.rpm = Some(rpm);
                self.speed_kph = Some(speed_kph);
            }
            FieldGroup::Coolant { coolant_c } => self.coolant_c = Some(coolant_c),
            FieldGroup::EngineData {
                throttle_pct,
                manifold_kpa,
                intake_air_c,
            } => {
                self.throttle_pct = Some(throttle_pct);
                self.manifold_kpa = Some(manifold_kpa);
                self.intake_air_c = Some(intake_air_c);
            }
            FieldGroup::Transmission { gear } => self.gear = gear,
            FieldGroup::FuelSystem { level_pct, flow_lph } => {
                self.fuel_level_pct = Some(level_pct.clamp(0.0, 100.0));
                self.fuel_flow_lph = Some(flow_lph.max(0.0));
            }
            FieldGroup::Body { mil, battery_v } => {
                self.mil = Some(mil);
                if battery_v.is_some() {
                    self.battery_v = battery_v;
                }
            }
        }
    }

    /// Cumulative consumption in litres
    pub fn fuel_consumed_liters(&self, margin: Margin) -> f64 {
        match margin {
            Margin::Applied => self.fuel_consumed_liters * self.safety_margin,
            Margin::Raw => self.fuel_consumed_liters,
        }
    }

    /// Cumulative consumption in US gallons
    pub fn fuel_consumed_gallons(&self, margin: Margin) -> f64 {
        self.fuel_consumed_liters(margin) / LITERS_PER_GALLON
    }

    /// True once a fuel-system frame with flow has been decoded
    pub fn has_valid_fuel_data(&self) -> bool {
        self.has_fuel_data
    }

    /// Arrival time of the last fuel-system frame since the last manual reset
    pub fn last_fuel_sample(&self) -> Option<Instant> {
        self.last_fuel_sample
    }

    /// Arrival time of the last decoded frame of any kind
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Configured safety margin
    pub fn safety_margin(&self) -> f64 {
        self.safety_margin
    }

    /// Road speed in mph
    pub fn speed_mph(&self) -> Option<f64> {
        self.speed_kph.map(|kph| kph * MILES_PER_KM)
    }

    /// Coolant temperature in degF
    pub fn coolant_f(&self) -> Option<f64> {
        self.coolant_c.map(|c| c * 9.0 / 5.0 + 32.0)
    }

    /// Engine turning
    pub fn is_engine_running(&self) -> bool {
        self.rpm.map_or(false, |rpm| rpm > 0.0)
    }
}

struct Inner {
    state: TelemetryState,
    fuel: FuelEngine,
}

/// Thread-safe telemetry record shared by bus channels, the compositor and the API
pub struct SharedTelemetry {
    inner: Mutex<Inner>,
}

impl SharedTelemetry {
    /// Create an empty record with a fresh fuel engine
    pub fn new(config: FuelConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: TelemetryState::new(config.safety_margin),
                fuel: FuelEngine::new(config),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, TelemetryError> {
        self.inner.lock().map_err(|_| {
            error!("Telemetry lock poisoned");
            TelemetryError::LockPoisoned
        })
    }

    /// Copy of the current record
    pub fn snapshot(&self) -> Result<TelemetryState, TelemetryError> {
        Ok(self.lock()?.state)
    }

    /// Apply one decoded field group and stamp `last_update`.
    ///
    /// Fuel-system groups also run the fuel engine; its event, if any, is
    /// returned for logging outside the lock.
    pub fn apply(&self, group: FieldGroup, at: Instant) -> Result<Option<FuelEvent>, TelemetryError> {
        let mut guard = self.lock()?;
        let Inner { state, fuel } = &mut *guard;

        state.apply(&group);
        let event = match group {
            FieldGroup::FuelSystem { level_pct, flow_lph } => {
                fuel.record_sample(state, level_pct.clamp(0.0, 100.0), flow_lph.max(0.0), at)
            }
            _ => None,
        };
        state.last_update = Some(at);

        Ok(event)
    }

    /// Operator-triggered fuel reset. Returns the margined consumption that
    /// was cleared, in litres.
    pub fn reset_fuel(&self) -> Result<f64, TelemetryError> {
        let (previous, margin) = {
            let mut guard = self.lock()?;
            let Inner { state, fuel } = &mut *guard;
            (fuel.manual_reset(state), state.safety_margin)
        };

        info!(
            "Fuel consumption manually reset (was {:.3} L reported)",
            previous * margin
        );
        Ok(previous * margin)
    }

    /// Refuel detector state and has-driven latch
    pub fn fuel_status(&self) -> Result<(FuelResetState, bool), TelemetryError> {
        let guard = self.lock()?;
        Ok((guard.fuel.reset_state(), guard.fuel.has_driven()))
    }
}
