//! Position fix model and shared state

use crate::error::PositionError;
use crate::{MPS_TO_KPH, MPS_TO_MPH};
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::error;

/// Receiver fix quality (gpsd `mode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixQuality {
    /// No usable fix
    NoFix,
    /// Horizontal fix only
    Fix2d,
    /// Horizontal and vertical fix
    Fix3d,
}

impl FixQuality {
    /// Map gpsd's `mode` (0/1 = none, 2 = 2D, 3 = 3D)
    pub fn from_mode(mode: u8) -> Self {
        match mode {
            2 => FixQuality::Fix2d,
            m if m >= 3 => FixQuality::Fix3d,
            _ => FixQuality::NoFix,
        }
    }
}

/// One position report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    /// Latitude (deg)
    pub lat: f64,
    /// Longitude (deg)
    pub lon: f64,
    /// Ground speed (m/s)
    pub speed_mps: f64,
    /// Course over ground (deg)
    pub heading_deg: Option<f64>,
    /// Altitude (m)
    pub altitude_m: Option<f64>,
    /// Fix quality
    pub fix: FixQuality,
    /// Satellites used in the solution, from the latest sky report
    pub satellites: Option<u8>,
    /// When the report was received
    pub received_at: Instant,
}

impl PositionFix {
    /// At least a 2D fix
    pub fn has_fix(&self) -> bool {
        self.fix != FixQuality::NoFix
    }

    /// Ground speed in mph
    pub fn speed_mph(&self) -> f64 {
        self.speed_mps * MPS_TO_MPH
    }

    /// Ground speed in km/h
    pub fn speed_kph(&self) -> f64 {
        self.speed_mps * MPS_TO_KPH
    }
}

#[derive(Debug, Default)]
struct Inner {
    fix: Option<PositionFix>,
    satellites: Option<u8>,
}

/// Latest position, written by the position thread and read per tick
#[derive(Debug)]
pub struct SharedPosition {
    inner: Mutex<Inner>,
    stale_after: Duration,
}

impl SharedPosition {
    /// Reports older than `stale_after` are not handed out
    pub fn new(stale_after: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            stale_after,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, PositionError> {
        self.inner.lock().map_err(|_| {
            error!("Position lock poisoned");
            PositionError::LockPoisoned
        })
    }

    /// Store a new fix, carrying over the latest satellite count
    pub fn update_fix(&self, mut fix: PositionFix) -> Result<(), PositionError> {
        let mut inner = self.lock()?;
        if fix.satellites.is_none() {
            fix.satellites = inner.satellites;
        }
        inner.fix = Some(fix);
        Ok(())
    }

    /// Store the satellites-used count from a sky report
    pub fn update_satellites(&self, used: u8) -> Result<(), PositionError> {
        let mut inner = self.lock()?;
        inner.satellites = Some(used);
        if let Some(fix) = inner.fix.as_mut() {
            fix.satellites = Some(used);
        }
        Ok(())
    }

    /// Latest fix if it is younger than the staleness limit at `now`
    pub fn snapshot_at(&self, now: Instant) -> Result<Option<PositionFix>, PositionError> {
        let inner = self.lock()?;
        Ok(inner
            .fix
            .filter(|fix| now.saturating_duration_since(fix.received_at) <= self.stale_after))
    }

    /// Latest fresh fix
    pub fn snapshot(&self) -> Result<Option<PositionFix>, PositionError> {
        self.snapshot_at(Instant::now())
    }

    /// Time since the last report, if any
    pub fn age(&self, now: Instant) -> Result<Option<Duration>, PositionError> {
        let inner = self.lock()?;
        Ok(inner.fix.map(|fix| now.saturating_duration_since(fix.received_at)))
    }

    /// Staleness limit
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }
}
