//! Frame pacing and overrun policy

use crate::OverlayError;
use metrics::{counter, histogram};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::warn;

/// Display tick configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PacingConfig {
    /// Display ticks per second
    pub tick_rate_hz: f64,
    /// Consecutive overruns after which one tick is skipped
    pub max_consecutive_overruns: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 15.0,
            max_consecutive_overruns: 3,
        }
    }
}

impl PacingConfig {
    /// Reject a non-positive tick rate or a zero overrun limit
    pub fn validate(&self) -> Result<(), OverlayError> {
        if !self.tick_rate_hz.is_finite() || self.tick_rate_hz <= 0.0 {
            return Err(OverlayError::InvalidConfig {
                field: "pacing.tick_rate_hz",
                reason: format!("must be positive, got {}", self.tick_rate_hz),
            });
        }
        if self.max_consecutive_overruns == 0 {
            return Err(OverlayError::InvalidConfig {
                field: "pacing.max_consecutive_overruns",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// What the tick loop should do this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Composite and present
    Run,
    /// Skip; the display keeps the previous page
    Drop,
}

/// Tracks tick durations against the period and decides when to shed a tick
pub struct FramePacer {
    period: Duration,
    max_consecutive: u32,
    consecutive: u32,
    overruns: u64,
    dropped: u64,
}

impl FramePacer {
    /// Pacer with no overruns recorded
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            period: Duration::from_secs_f64(1.0 / config.tick_rate_hz),
            max_consecutive: config.max_consecutive_overruns,
            consecutive: 0,
            overruns: 0,
            dropped: 0,
        }
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Call at the start of every tick
    pub fn begin(&mut self) -> TickDecision {
        if self.consecutive >= self.max_consecutive {
            self.consecutive = 0;
            self.dropped += 1;
            counter!("compositor_dropped_ticks_total").increment(1);
            warn!(
                "Dropping display tick after {} consecutive overruns",
                self.max_consecutive
            );
            return TickDecision::Drop;
        }
        TickDecision::Run
    }

    /// Report how long a tick that ran took. Returns true on overrun.
    pub fn finish(&mut self, elapsed: Duration) -> bool {
        histogram!("compositor_tick_seconds").record(elapsed.as_secs_f64());
        if elapsed <= self.period {
            self.consecutive = 0;
            return false;
        }

        self.consecutive += 1;
        self.overruns += 1;
        counter!("compositor_overruns_total").increment(1);
        warn!(
            "Display tick overran: {:.1} ms against {:.1} ms budget",
            elapsed.as_secs_f64() * 1000.0,
            self.period.as_secs_f64() * 1000.0
        );
        true
    }

    /// Time left before the next tick is due
    pub fn remaining(&self, tick_start: Instant, now: Instant) -> Duration {
        (tick_start + self.period).saturating_duration_since(now)
    }

    /// Total overruns
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Total dropped ticks
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer(max: u32) -> FramePacer {
        FramePacer::new(&PacingConfig {
            tick_rate_hz: 10.0,
            max_consecutive_overruns: max,
        })
    }

    const SLOW: Duration = Duration::from_millis(150);
    const FAST: Duration = Duration::from_millis(20);

    #[test]
    fn test_drops_exactly_one_tick_after_consecutive_overruns() {
        let mut p = pacer(3);
        for _ in 0..3 {
            assert_eq!(p.begin(), TickDecision::Run);
            assert!(p.finish(SLOW));
        }
        assert_eq!(p.begin(), TickDecision::Drop);
        assert_eq!(p.begin(), TickDecision::Run);
        assert_eq!(p.dropped(), 1);
        assert_eq!(p.overruns(), 3);
    }

    #[test]
    fn test_on_time_tick_resets_streak() {
        let mut p = pacer(2);
        p.begin();
        p.finish(SLOW);
        p.begin();
        assert!(!p.finish(FAST));
        p.begin();
        p.finish(SLOW);
        assert_eq!(p.begin(), TickDecision::Run);
        assert_eq!(p.dropped(), 0);
    }

    #[test]
    fn test_exact_period_is_not_an_overrun() {
        let mut p = pacer(1);
        assert!(!p.finish(Duration::from_millis(100)));
    }

    #[test]
    fn test_remaining() {
        let p = pacer(1);
        let start = Instant::now();
        assert_eq!(p.remaining(start, start + FAST), Duration::from_millis(80));
        assert_eq!(p.remaining(start, start + SLOW), Duration::ZERO);
    }

    #[test]
    fn test_validate() {
        assert!(PacingConfig::default().validate().is_ok());
        let bad = PacingConfig {
            tick_rate_hz: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(OverlayError::InvalidConfig { field: "pacing.tick_rate_hz", .. })
        ));
    }
}
