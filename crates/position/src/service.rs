//! Position service thread

use crate::error::PositionError;
use crate::fix::SharedPosition;
use crate::gpsd::Report;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A stream of position reports
pub trait PositionSource: Send {
    /// (Re)establish the connection
    fn connect(&mut self) -> Result<(), PositionError>;

    /// Next report. `Ok(None)` on read timeout or an unusable report.
    fn next_report(&mut self) -> Result<Option<Report>, PositionError>;

    /// Human-readable source name for logs
    fn describe(&self) -> String;
}

/// Position service configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PositionConfig {
    /// Whether to run the position thread at all
    pub enabled: bool,
    /// gpsd address, `host:port`
    pub gpsd_address: String,
    /// Connection attempts before giving up
    pub retry_attempts: u32,
    /// Delay between connection attempts (seconds)
    pub retry_delay_secs: f64,
    /// Reports older than this are treated as missing (seconds)
    pub stale_after_secs: f64,
    /// Socket read timeout (seconds)
    pub read_timeout_secs: f64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gpsd_address: "127.0.0.1:2947".to_string(),
            retry_attempts: 5,
            retry_delay_secs: 5.0,
            stale_after_secs: 10.0,
            read_timeout_secs: 1.0,
        }
    }
}

impl PositionConfig {
    /// Check ranges
    pub fn validate(&self) -> Result<(), PositionError> {
        if self.retry_attempts == 0 {
            return Err(PositionError::InvalidConfig {
                field: "position.retry_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        let durations = [
            ("position.retry_delay_secs", self.retry_delay_secs, false),
            ("position.stale_after_secs", self.stale_after_secs, true),
            ("position.read_timeout_secs", self.read_timeout_secs, true),
        ];
        for (field, value, strictly_positive) in durations {
            let ok = value.is_finite() && if strictly_positive { value > 0.0 } else { value >= 0.0 };
            if !ok {
                return Err(PositionError::InvalidConfig {
                    field,
                    reason: format!("invalid duration {}", value),
                });
            }
        }
        Ok(())
    }

    /// Delay between connection attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }

    /// Staleness limit
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs_f64(self.stale_after_secs)
    }

    /// Socket read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout_secs)
    }
}

/// Handle to the running position thread
pub struct PositionService {
    handle: JoinHandle<()>,
}

impl PositionService {
    /// Spawn the position thread
    pub fn spawn(
        mut source: Box<dyn PositionSource>,
        shared: Arc<SharedPosition>,
        config: PositionConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, PositionError> {
        let handle = std::thread::Builder::new()
            .name("position".to_string())
            .spawn(move || {
                info!("Position service reading from {}", source.describe());
                run(source.as_mut(), &shared, &config, &shutdown);
                debug!("Position service stopped");
            })?;

        Ok(Self { handle })
    }

    /// Wait for the thread to exit
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("Position thread panicked");
        }
    }
}

fn run(
    source: &mut dyn PositionSource,
    shared: &SharedPosition,
    config: &PositionConfig,
    shutdown: &AtomicBool,
) {
    // One reconnect per staleness episode
    let mut stale_warned = false;

    while !shutdown.load(Ordering::SeqCst) {
        if !connect_with_retry(source, config, shutdown) {
            return;
        }

        while !shutdown.load(Ordering::SeqCst) {
            match source.next_report() {
                Ok(Some(Report::Fix(fix))) => {
                    stale_warned = false;
                    if let Err(e) = shared.update_fix(fix) {
                        error!("Dropping position report: {}", e);
                    }
                }
                Ok(Some(Report::Satellites(used))) => {
                    if let Err(e) = shared.update_satellites(used) {
                        error!("Dropping sky report: {}", e);
                    }
                }
                Ok(None) => {}
                Err(PositionError::Parse(e)) => debug!("Skipping report: {}", e),
                Err(e) => {
                    warn!("Position source error: {}", e);
                    break;
                }
            }

            if let Ok(Some(age)) = shared.age(Instant::now()) {
                if age > config.stale_after() && !stale_warned {
                    warn!("Position data stale ({:.1}s old), reconnecting", age.as_secs_f64());
                    stale_warned = true;
                    break;
                }
            }
        }
    }
}

/// Try to connect up to `retry_attempts` times. Returns false when the
/// attempts are exhausted or shutdown was requested.
fn connect_with_retry(
    source: &mut dyn PositionSource,
    config: &PositionConfig,
    shutdown: &AtomicBool,
) -> bool {
    for attempt in 1..=config.retry_attempts {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        match source.connect() {
            Ok(()) => return true,
            Err(e) => {
                warn!(
                    "Position connect attempt {}/{} failed: {}",
                    attempt, config.retry_attempts, e
                );
                if attempt < config.retry_attempts {
                    sleep_unless_shutdown(config.retry_delay(), shutdown);
                }
            }
        }
    }

    error!(
        "Giving up on {} after {} attempts, position overlay disabled",
        source.describe(),
        config.retry_attempts
    );
    false
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let step = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(step.min(deadline - now));
    }
}
