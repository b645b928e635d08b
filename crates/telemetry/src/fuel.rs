//! Fuel Accumulation Engine
//!
//! Integrates instantaneous fuel flow over the irregular intervals between
//! fuel-system frames and detects refuelling from the tank level.
//!
//! Consumption is a right-endpoint Riemann sum: each sample's flow is applied
//! to the interval since the previous sample, so a missed frame lengthens the
//! next interval instead of silently dropping fuel.
//!
//! # Auto-reset
//!
//! ```text
//!   level < threshold          -> Idle, has_driven = true
//!   Idle, level >= threshold   -> ArmedSince(now)   (only if has_driven)
//!   ArmedSince(t), held >= arm -> reset consumed, has_driven = false, Idle
//! ```
//!
//! Starting the car with a full tank never resets: the level has to be seen
//! below the threshold first.

use crate::error::TelemetryError;
use crate::state::TelemetryState;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Fuel engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuelConfig {
    /// Multiplier applied to reported consumption (>= 1.0)
    pub safety_margin: f64,
    /// Whether refuel detection runs at all
    pub auto_reset_enabled: bool,
    /// Tank level treated as full (%)
    pub auto_reset_threshold_pct: f64,
    /// How long the level must stay at or above the threshold (seconds)
    pub arm_duration_secs: f64,
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self {
            safety_margin: 1.025,
            auto_reset_enabled: true,
            auto_reset_threshold_pct: 95.0,
            arm_duration_secs: 5.0,
        }
    }
}

impl FuelConfig {
    /// Check ranges
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if !self.safety_margin.is_finite() || self.safety_margin < 1.0 {
            return Err(TelemetryError::InvalidConfig {
                field: "fuel.safety_margin",
                reason: format!("must be >= 1.0, got {}", self.safety_margin),
            });
        }
        let t = self.auto_reset_threshold_pct;
        if !t.is_finite() || t <= 0.0 || t > 100.0 {
            return Err(TelemetryError::InvalidConfig {
                field: "fuel.auto_reset_threshold_pct",
                reason: format!("must be in (0, 100], got {}", t),
            });
        }
        if !self.arm_duration_secs.is_finite() || self.arm_duration_secs < 0.0 {
            return Err(TelemetryError::InvalidConfig {
                field: "fuel.arm_duration_secs",
                reason: format!("must be >= 0, got {}", self.arm_duration_secs),
            });
        }
        Ok(())
    }

    /// Arm duration as a [`Duration`]
    pub fn arm_duration(&self) -> Duration {
        Duration::from_secs_f64(self.arm_duration_secs)
    }
}

/// Refuel detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FuelResetState {
    /// Not armed
    #[default]
    Idle,
    /// Level has been at or above the threshold continuously since this instant
    ArmedSince(Instant),
}

/// State-machine transitions worth logging. Returned to the caller so they
/// can be logged once the telemetry lock is released.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FuelEvent {
    /// Level reached the threshold after driving
    Armed {
        /// Level that armed the timer (%)
        level_pct: f64,
    },
    /// Level dropped before the arm duration elapsed
    Disarmed {
        /// Level that cancelled the timer (%)
        level_pct: f64,
    },
    /// Refuel confirmed, consumption zeroed
    AutoReset {
        /// Unmargined consumption before the reset (L)
        previous_liters: f64,
        /// Level at reset time (%)
        level_pct: f64,
    },
}

/// Accumulator and refuel detector. Lives under the telemetry lock.
#[derive(Debug, Clone)]
pub struct FuelEngine {
    config: FuelConfig,
    reset_state: FuelResetState,
    has_driven: bool,
}

impl FuelEngine {
    /// Create an engine in the `Idle` state with the has-driven latch clear
    pub fn new(config: FuelConfig) -> Self {
        Self {
            config,
            reset_state: FuelResetState::Idle,
            has_driven: false,
        }
    }

    /// Process one decoded fuel-system sample.
    ///
    /// `state` must already carry the new level and flow.
    pub fn record_sample(
        &mut self,
        state: &mut TelemetryState,
        level_pct: f64,
        flow_lph: f64,
        now: Instant,
    ) -> Option<FuelEvent> {
        if let Some(last) = state.last_fuel_sample {
            if flow_lph > 0.0 {
                let dt_hours = now.saturating_duration_since(last).as_secs_f64() / 3600.0;
                state.fuel_consumed_liters += flow_lph * dt_hours;
            }
        }
        state.last_fuel_sample = Some(now);
        state.has_fuel_data = true;

        if !self.config.auto_reset_enabled {
            return None;
        }
        self.step(state, level_pct, now)
    }

    fn step(&mut self, state: &mut TelemetryState, level_pct: f64, now: Instant) -> Option<FuelEvent> {
        if level_pct < self.config.auto_reset_threshold_pct {
            self.has_driven = true;
            return match self.reset_state {
                FuelResetState::ArmedSince(_) => {
                    self.reset_state = FuelResetState::Idle;
                    Some(FuelEvent::Disarmed { level_pct })
                }
                FuelResetState::Idle => None,
            };
        }

        match self.reset_state {
            FuelResetState::Idle if self.has_driven => {
                self.reset_state = FuelResetState::ArmedSince(now);
                Some(FuelEvent::Armed { level_pct })
            }
            FuelResetState::Idle => None,
            FuelResetState::ArmedSince(since)
                if now.saturating_duration_since(since) >= self.config.arm_duration() =>
            {
                let previous_liters = state.fuel_consumed_liters;
                state.fuel_consumed_liters = 0.0;
                self.has_driven = false;
                self.reset_state = FuelResetState::Idle;
                Some(FuelEvent::AutoReset {
                    previous_liters,
                    level_pct,
                })
            }
            FuelResetState::ArmedSince(_) => None,
        }
    }

    /// Operator reset: zero consumption and forget the last sample time.
    /// The has-driven latch and the fuel-data latch are left alone.
    /// Returns the unmargined consumption before the reset.
    pub fn manual_reset(&mut self, state: &mut TelemetryState) -> f64 {
        let previous = state.fuel_consumed_liters;
        state.fuel_consumed_liters = 0.0;
        state.last_fuel_sample = None;
        self.reset_state = FuelResetState::Idle;
        previous
    }

    /// Current refuel detector state
    pub fn reset_state(&self) -> FuelResetState {
        self.reset_state
    }

    /// Whether the level has been seen below the threshold since the last auto-reset
    pub fn has_driven(&self) -> bool {
        self.has_driven
    }

    /// Configuration
    pub fn config(&self) -> &FuelConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Margin;
    use proptest::prelude::*;

    #[test]
    fn test_config_requires_every_field() {
        let json = r#"{"safety_margin": 1.03, "auto_reset_enabled": true,
            "auto_reset_threshold_pct": 90.0, "arm_duration_secs": 10.0}"#;
        let config: FuelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.safety_margin, 1.03);
        assert_eq!(config.arm_duration(), Duration::from_secs(10));

        let missing = r#"{"safety_margin": 1.03, "auto_reset_enabled": true}"#;
        assert!(serde_json::from_str::<FuelConfig>(missing).is_err());

        let unknown = r#"{"safety_margin": 1.03, "auto_reset_enabled": true,
            "auto_reset_threshold_pct": 90.0, "arm_duration_secs": 10.0, "tank_l": 70}"#;
        assert!(serde_json::from_str::<FuelConfig>(unknown).is_err());
    }

    struct Rig {
        state: TelemetryState,
        engine: FuelEngine,
        base: Instant,
        events: Vec<(f64, FuelEvent)>,
    }

    impl Rig {
        fn new(config: FuelConfig) -> Self {
            Self {
                state: TelemetryState::new(config.safety_margin),
                engine: FuelEngine::new(config),
                base: Instant::now(),
                events: Vec::new(),
            }
        }

        fn sample(&mut self, t_secs: f64, level: f64, flow: f64) {
            let now = self.base + Duration::from_secs_f64(t_secs);
            self.state.fuel_level_pct = Some(level);
            self.state.fuel_flow_lph = Some(flow);
            if let Some(event) = self.engine.record_sample(&mut self.state, level, flow, now) {
                self.events.push((t_secs, event));
            }
        }

        fn resets(&self) -> Vec<f64> {
            self.events
                .iter()
                .filter(|(_, e)| matches!(e, FuelEvent::AutoReset { .. }))
                .map(|(t, _)| *t)
                .collect()
        }

        fn consumed(&self) -> f64 {
            self.state.fuel_consumed_liters(Margin::Raw)
        }
    }

    #[test]
    fn test_first_sample_only_stamps_time() {
        let mut rig = Rig::new(FuelConfig::default());
        assert!(!rig.state.has_valid_fuel_data());
        rig.sample(0.0, 50.0, 10.0);
        assert_eq!(rig.consumed(), 0.0);
        assert!(rig.state.has_valid_fuel_data());
        assert!(rig.state.last_fuel_sample().is_some());
    }

    #[test]
    fn test_two_liters_per_hour_for_six_minutes() {
        let mut rig = Rig::new(FuelConfig::default());
        rig.sample(0.0, 80.0, 2.0);
        rig.sample(360.0, 80.0, 2.0);
        assert!((rig.consumed() - 0.200).abs() < 1e-9);
    }

    #[test]
    fn test_zero_flow_contributes_nothing() {
        let mut rig = Rig::new(FuelConfig::default());
        rig.sample(0.0, 80.0, 3.0);
        rig.sample(100.0, 80.0, 0.0);
        rig.sample(3700.0, 80.0, 0.0);
        rig.sample(3736.0, 80.0, 10.0);
        // Only the last 36 s interval at 10 L/h counts
        assert!((rig.consumed() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_full_tank_from_start_never_resets() {
        let mut rig = Rig::new(FuelConfig::default());
        for i in 0..600 {
            rig.sample(i as f64, 100.0, 1.0);
        }
        assert!(rig.resets().is_empty());
        assert_eq!(rig.engine.reset_state(), FuelResetState::Idle);
        assert!(rig.consumed() > 0.0);
    }

    #[test]
    fn test_refuel_resets_once_at_arm_duration() {
        let mut rig = Rig::new(FuelConfig::default());
        rig.sample(0.0, 60.0, 2.0);
        rig.sample(1.0, 60.0, 2.0);
        // Crossing at t=10, held at 96 % for 6 s in 0.5 s steps
        let mut t = 10.0;
        while t <= 16.0 {
            rig.sample(t, 96.0, 2.0);
            t += 0.5;
        }
        assert_eq!(rig.resets(), vec![15.0]);
        assert!(!rig.engine.has_driven());
        // Only the post-reset interval remains
        assert!((rig.consumed() - 2.0 * 1.0 / 3600.0).abs() < 1e-9);
    }

    #[test]
    fn test_dip_restarts_arm_timer() {
        let mut rig = Rig::new(FuelConfig::default());
        rig.sample(0.0, 50.0, 1.0);
        rig.sample(1.0, 96.0, 1.0); // armed at 1
        rig.sample(4.0, 96.0, 1.0);
        rig.sample(5.0, 94.0, 1.0); // dip, disarmed
        rig.sample(6.0, 96.0, 1.0); // re-armed at 6
        rig.sample(10.0, 96.0, 1.0); // 4 s held, not yet
        assert!(rig.resets().is_empty());
        rig.sample(11.0, 96.0, 1.0);
        assert_eq!(rig.resets(), vec![11.0]);

        let kinds: Vec<_> = rig
            .events
            .iter()
            .map(|(_, e)| std::mem::discriminant(e))
            .collect();
        assert_eq!(kinds.len(), 4);
        assert!(matches!(rig.events[1].1, FuelEvent::Disarmed { .. }));
    }

    #[test]
    fn test_disabled_auto_reset() {
        let mut rig = Rig::new(FuelConfig {
            auto_reset_enabled: false,
            ..Default::default()
        });
        rig.sample(0.0, 10.0, 5.0);
        for i in 1..20 {
            rig.sample(i as f64, 100.0, 5.0);
        }
        assert!(rig.events.is_empty());
        assert!(!rig.engine.has_driven());
    }

    #[test]
    fn test_manual_reset_keeps_has_driven() {
        let mut rig = Rig::new(FuelConfig::default());
        rig.sample(0.0, 50.0, 4.0);
        rig.sample(900.0, 50.0, 4.0);
        assert!(rig.consumed() > 0.0);
        assert!(rig.engine.has_driven());

        let previous = rig.engine.manual_reset(&mut rig.state);
        assert!((previous - 1.0).abs() < 1e-9);
        assert_eq!(rig.consumed(), 0.0);
        assert!(rig.state.last_fuel_sample().is_none());
        assert!(rig.engine.has_driven());
        assert!(rig.state.has_valid_fuel_data());

        // Next refuel still auto-resets
        rig.sample(1000.0, 97.0, 1.0);
        rig.sample(1006.0, 97.0, 1.0);
        assert_eq!(rig.resets(), vec![1006.0]);
    }

    #[test]
    fn test_manual_reset_does_not_set_has_driven() {
        let mut rig = Rig::new(FuelConfig::default());
        rig.sample(0.0, 100.0, 4.0);
        rig.engine.manual_reset(&mut rig.state);
        assert!(!rig.engine.has_driven());
    }

    #[test]
    fn test_config_validation() {
        assert!(FuelConfig::default().validate().is_ok());
        assert!(FuelConfig { safety_margin: 1.0, ..Default::default() }.validate().is_ok());

        let cases = [
            (FuelConfig { safety_margin: 0.9, ..Default::default() }, "fuel.safety_margin"),
            (FuelConfig { auto_reset_threshold_pct: 0.0, ..Default::default() }, "fuel.auto_reset_threshold_pct"),
            (FuelConfig { auto_reset_threshold_pct: 100.5, ..Default::default() }, "fuel.auto_reset_threshold_pct"),
            (FuelConfig { arm_duration_secs: -1.0, ..Default::default() }, "fuel.arm_duration_secs"),
        ];
        for (config, expected) in cases {
            match config.validate() {
                Err(TelemetryError::InvalidConfig { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected {} error, got {:?}", expected, other),
            }
        }
    }

    proptest! {
        #[test]
        fn prop_consumption_is_riemann_sum(
            samples in proptest::collection::vec((1u32..5_000, 0.0f64..60.0), 1..100)
        ) {
            let mut rig = Rig::new(FuelConfig { auto_reset_enabled: false, ..Default::default() });
            rig.sample(0.0, 50.0, 0.0);

            let mut t_ms = 0u64;
            let mut expected = 0.0;
            for (dt_ms, flow) in samples {
                t_ms += dt_ms as u64;
                rig.sample(t_ms as f64 / 1000.0, 50.0, flow);
                expected += flow * (dt_ms as f64 / 1000.0) / 3600.0;
            }
            prop_assert!((rig.consumed() - expected).abs() < 1e-9 * (1.0 + expected));
        }

        #[test]
        fn prop_consumption_never_decreases_without_reset(
            flows in proptest::collection::vec(0.0f64..100.0, 1..200)
        ) {
            let mut rig = Rig::new(FuelConfig { auto_reset_enabled: false, ..Default::default() });
            let mut last = 0.0;
            for (i, flow) in flows.into_iter().enumerate() {
                rig.sample(i as f64, 40.0, flow);
                prop_assert!(rig.consumed() >= last);
                last = rig.consumed();
            }
        }
    }
}
