//! Protocol Decoder
//!
//! Runs inline on whichever bus channel thread received the frame. Table
//! lookup and unit conversion happen before the telemetry lock is taken.

use crate::error::DecodeError;
use crate::fuel::FuelEvent;
use crate::profile::{ScalingConfig, VehicleProfile};
use crate::state::SharedTelemetry;
use can_protocol::{BusFrame, FrameSink};
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Diagnostic counters
#[derive(Debug, Default)]
pub struct DecodeStats {
    decoded: AtomicU64,
    unknown: AtomicU64,
    short: AtomicU64,
}

impl DecodeStats {
    /// Frames decoded and applied
    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    /// Frames with identifiers not in the profile
    pub fn unknown(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }

    /// Known frames with payloads too short to decode
    pub fn short(&self) -> u64 {
        self.short.load(Ordering::Relaxed)
    }
}

/// Per-vehicle frame decoder writing into the shared telemetry record
pub struct Decoder {
    profile: &'static VehicleProfile,
    scaling: ScalingConfig,
    telemetry: Arc<SharedTelemetry>,
    stats: DecodeStats,
}

impl Decoder {
    /// Create a decoder for one vehicle profile
    pub fn new(
        profile: &'static VehicleProfile,
        scaling: ScalingConfig,
        telemetry: Arc<SharedTelemetry>,
    ) -> Self {
        info!("Decoder using vehicle profile {}", profile.name);
        Self {
            profile,
            scaling,
            telemetry,
            stats: DecodeStats::default(),
        }
    }

    /// Decode one frame into the telemetry record.
    ///
    /// Unknown identifiers are ignored and return `Ok`. Short payloads are
    /// ignored and reported as [`DecodeError::ShortPayload`]; the state is
    /// not touched in either case.
    pub fn decode(&self, frame: &BusFrame) -> Result<(), DecodeError> {
        let spec = match self.profile.lookup(frame.id()) {
            Some(spec) if !frame.is_extended() => spec,
            _ => {
                self.stats.unknown.fetch_add(1, Ordering::Relaxed);
                counter!("can_frames_unknown_total").increment(1);
                return Ok(());
            }
        };

        let payload = frame.payload();
        if payload.len() < spec.min_len {
            self.stats.short.fetch_add(1, Ordering::Relaxed);
            counter!("can_frames_short_total").increment(1);
            return Err(DecodeError::ShortPayload {
                id: frame.id(),
                len: payload.len(),
                required: spec.min_len,
            });
        }

        let group = (spec.decode)(payload, &self.scaling);
        let event = self
            .telemetry
            .apply(group, frame.timestamp())
            .map_err(|_| DecodeError::StatePoisoned)?;

        self.stats.decoded.fetch_add(1, Ordering::Relaxed);
        counter!("can_frames_decoded_total").increment(1);
        debug!("{} -> {}", frame, group.kind());

        if let Some(event) = event {
            log_fuel_event(event);
        }
        Ok(())
    }

    /// Diagnostic counters
    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Shared record this decoder writes into
    pub fn telemetry(&self) -> &Arc<SharedTelemetry> {
        &self.telemetry
    }

    /// Active profile
    pub fn profile(&self) -> &'static VehicleProfile {
        self.profile
    }
}

impl FrameSink for Decoder {
    fn on_frame(&self, frame: &BusFrame) {
        match self.decode(frame) {
            Ok(()) => {}
            Err(e @ DecodeError::ShortPayload { .. }) => debug!("Ignoring frame: {}", e),
            Err(e) => error!("Dropping frame {}: {}", frame, e),
        }
    }
}

fn log_fuel_event(event: FuelEvent) {
    match event {
        FuelEvent::Armed { level_pct } => {
            info!("Fuel level at {:.1}% after driving, auto-reset timer started", level_pct)
        }
        FuelEvent::Disarmed { level_pct } => {
            debug!("Fuel level dropped to {:.1}%, auto-reset timer cancelled", level_pct)
        }
        FuelEvent::AutoReset {
            previous_liters,
            level_pct,
        } => {
            counter!("fuel_auto_resets_total").increment(1);
            info!(
                "Refuel detected, fuel consumption reset (was {:.3} L, level {:.1}%)",
                previous_liters, level_pct
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuel::FuelConfig;
    use crate::profile::CAMARO_2013_LFX;
    use crate::state::Margin;
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    fn decoder() -> Decoder {
        let telemetry = Arc::new(SharedTelemetry::new(FuelConfig::default()));
        Decoder::new(&CAMARO_2013_LFX, ScalingConfig::default(), telemetry)
    }

    fn frame(id: u32, payload: &[u8], at: Instant) -> BusFrame {
        BusFrame::new(id, payload, 0, at).unwrap()
    }

    #[test]
    fn test_unknown_identifier_ignored() {
        let decoder = decoder();
        let before = decoder.telemetry().snapshot().unwrap();
        assert_eq!(decoder.decode(&frame(0x7E8, &[1, 2, 3], Instant::now())), Ok(()));
        assert_eq!(decoder.telemetry().snapshot().unwrap(), before);
        assert_eq!(decoder.stats().unknown(), 1);
        assert_eq!(decoder.stats().decoded(), 0);
    }

    #[test]
    fn test_extended_frame_with_table_id_is_unknown() {
        let decoder = decoder();
        let f = BusFrame::new_extended(0x0F1, &[100], 0, Instant::now()).unwrap();
        assert_eq!(decoder.decode(&f), Ok(()));
        assert_eq!(decoder.stats().unknown(), 1);
        assert_eq!(decoder.telemetry().snapshot().unwrap().coolant_c, None);
    }

    #[test]
    fn test_short_payload_counted_not_applied() {
        let decoder = decoder();
        let before = decoder.telemetry().snapshot().unwrap();
        let result = decoder.decode(&frame(0x3D1, &[204, 0x00], Instant::now()));
        assert_eq!(
            result,
            Err(DecodeError::ShortPayload { id: 0x3D1, len: 2, required: 3 })
        );
        assert_eq!(decoder.telemetry().snapshot().unwrap(), before);
        assert_eq!(decoder.stats().short(), 1);
    }

    #[test]
    fn test_decode_stamps_arrival_time() {
        let decoder = decoder();
        let at = Instant::now();
        decoder.decode(&frame(0x0F1, &[130], at)).unwrap();
        let snap = decoder.telemetry().snapshot().unwrap();
        assert_eq!(snap.coolant_c, Some(90.0));
        assert_eq!(snap.last_update(), Some(at));
    }

    #[test]
    fn test_end_to_end_fuel_integration() {
        let decoder = decoder();
        let t0 = Instant::now();
        // level 204/255 = 80 %, flow 200 * 0.01 = 2.00 L/h
        decoder.decode(&frame(0x3D1, &[204, 0x00, 0xC8], t0)).unwrap();

        let snap = decoder.telemetry().snapshot().unwrap();
        assert!((snap.fuel_flow_lph.unwrap() - 2.0).abs() < 1e-9);
        assert!((snap.fuel_level_pct.unwrap() - 80.0).abs() < 1e-9);
        assert!(snap.has_valid_fuel_data());

        decoder
            .decode(&frame(0x3D1, &[204, 0x00, 0xC8], t0 + Duration::from_secs(360)))
            .unwrap();
        let snap = decoder.telemetry().snapshot().unwrap();
        assert!((snap.fuel_consumed_liters(Margin::Raw) - 0.200).abs() < 1e-9);
        assert!((snap.fuel_consumed_liters(Margin::Applied) - 0.205).abs() < 1e-9);
    }

    #[test]
    fn test_end_to_end_refuel() {
        let decoder = decoder();
        let t0 = Instant::now();
        let level = |pct: f64| (pct / 100.0 * 255.0).round() as u8;

        // Driving at 60 %
        decoder.decode(&frame(0x3D1, &[level(60.0), 0x01, 0x00], t0)).unwrap();
        decoder
            .decode(&frame(0x3D1, &[level(60.0), 0x01, 0x00], t0 + Duration::from_secs(600)))
            .unwrap();
        assert!(decoder.telemetry().snapshot().unwrap().fuel_consumed_liters(Margin::Raw) > 0.0);

        // Refuel to 96 % at t=700 and hold for 6 s, one frame per 100 ms
        let crossing = t0 + Duration::from_secs(700);
        let mut reset_at = None;
        for tick in 0..=60u64 {
            let at = crossing + Duration::from_millis(tick * 100);
            decoder.decode(&frame(0x3D1, &[level(96.0), 0x01, 0x00], at)).unwrap();
            let snap = decoder.telemetry().snapshot().unwrap();
            if reset_at.is_none() && snap.fuel_consumed_liters(Margin::Raw) == 0.0 {
                reset_at = Some(tick);
            }
        }
        // Fires at exactly 5 s after the crossing
        assert_eq!(reset_at, Some(50));
        let (state, has_driven) = decoder.telemetry().fuel_status().unwrap();
        assert_eq!(state, crate::fuel::FuelResetState::Idle);
        assert!(!has_driven);
    }

    #[test]
    fn test_body_frame_keeps_battery_when_short() {
        let decoder = decoder();
        let at = Instant::now();
        decoder.decode(&frame(0x4C1, &[0, 0, 0, 0, 0x31, 0x9C], at)).unwrap();
        decoder.decode(&frame(0x4C1, &[1], at)).unwrap();
        let snap = decoder.telemetry().snapshot().unwrap();
        assert_eq!(snap.mil, Some(true));
        assert!((snap.battery_v.unwrap() - 12.7).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_unknown_and_short_frames_never_mutate(
            id in 0u32..0x800,
            payload in proptest::collection::vec(any::<u8>(), 0..=8)
        ) {
            let decoder = decoder();
            let before = decoder.telemetry().snapshot().unwrap();
            let required = CAMARO_2013_LFX.lookup(id).map(|s| s.min_len);

            let result = decoder.decode(&frame(id, &payload, Instant::now()));
            let after = decoder.telemetry().snapshot().unwrap();

            match required {
                None => {
                    prop_assert_eq!(result, Ok(()));
                    prop_assert_eq!(after, before);
                }
                Some(min) if payload.len() < min => {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(after, before);
                }
                Some(_) => prop_assert_eq!(result, Ok(())),
            }
        }
    }
}
