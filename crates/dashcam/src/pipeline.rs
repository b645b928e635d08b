//! Display Tick Loop
//!
//! Takes the newest video frame, samples telemetry and position, composites
//! the overlay into the display's back page and presents it, once per tick.
//! Nothing here blocks the bus or capture threads: the only shared locks are
//! the telemetry and position snapshots, each held for a copy.

use crate::settings::RecordingConfig;
use chrono::Local;
use overlay::{Compositor, FramePacer, OverlayError, OverlayInputs, TickDecision};
use position::SharedPosition;
use present_buffer::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use telemetry::SharedTelemetry;
use tracing::{debug, error, info, warn};
use video_capture::{CaptureService, VideoFrame};

/// Counters published by the tick thread
#[derive(Debug, Default)]
pub struct TickStats {
    pub presents: AtomicU64,
    pub rendered: AtomicU64,
    pub overruns: AtomicU64,
    pub dropped: AtomicU64,
    pub failed: AtomicU64,
}

/// Where a tick's overlay inputs come from
pub struct TickSources {
    pub telemetry: Arc<SharedTelemetry>,
    pub position: Option<Arc<SharedPosition>>,
    pub recording: RecordingConfig,
}

impl TickSources {
    /// Snapshot everything the overlay needs. `None` only if the telemetry
    /// lock is poisoned.
    pub fn sample(&self) -> Option<OverlayInputs> {
        let telemetry = self.telemetry.snapshot().ok()?;
        let position = match &self.position {
            Some(shared) => shared.snapshot().unwrap_or_else(|e| {
                warn!("Position unavailable: {}", e);
                None
            }),
            None => None,
        };

        let speed_mph = position
            .filter(|p| p.has_fix())
            .map(|p| p.speed_mph())
            .or_else(|| telemetry.speed_mph());

        Some(OverlayInputs {
            telemetry,
            position,
            recording: self.recording.is_active(speed_mph),
            now: Local::now(),
        })
    }
}

/// Composite one frame into the back page and present it
pub fn render_tick(
    frame: &mut VideoFrame,
    inputs: &OverlayInputs,
    compositor: &mut Compositor,
    display: &mut dyn Display,
) -> Result<usize, OverlayError> {
    let rendered = {
        let mut back = display.back_buffer()?;
        compositor.composite(frame, inputs, &mut back)?
    };
    display.present()?;
    Ok(rendered)
}

/// Act on one captured frame under the pacer's decision. A dropped tick
/// leaves the front page untouched. Returns true if a page was presented.
pub fn run_tick(
    decision: TickDecision,
    frame: &mut VideoFrame,
    sources: &TickSources,
    compositor: &mut Compositor,
    display: &mut dyn Display,
    pacer: &mut FramePacer,
    stats: &TickStats,
) -> bool {
    if decision == TickDecision::Drop {
        stats.dropped.store(pacer.dropped(), Ordering::Relaxed);
        debug!("Skipped frame {}", frame.sequence);
        return false;
    }

    let work_start = Instant::now();
    let presented = match sources.sample() {
        Some(inputs) => match render_tick(frame, &inputs, compositor, display) {
            Ok(rendered) => {
                stats.rendered.fetch_add(rendered as u64, Ordering::Relaxed);
                stats.presents.store(display.presents(), Ordering::Relaxed);
                true
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Display tick failed: {}", e);
                false
            }
        },
        None => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!("Telemetry unavailable, frame {} not presented", frame.sequence);
            false
        }
    };
    pacer.finish(work_start.elapsed());
    stats.overruns.store(pacer.overruns(), Ordering::Relaxed);
    presented
}

/// Handle to the running tick thread
pub struct DisplayLoop {
    handle: JoinHandle<()>,
}

impl DisplayLoop {
    /// Spawn the tick thread. It owns the display and the capture hand-off
    /// and runs until shutdown or the end of the video stream.
    pub fn spawn(
        capture: CaptureService,
        mut display: Box<dyn Display>,
        mut compositor: Compositor,
        mut pacer: FramePacer,
        sources: TickSources,
        stats: Arc<TickStats>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let handle = std::thread::Builder::new()
            .name("display-tick".to_string())
            .spawn(move || {
                let described = display.describe();
                info!(
                    "Display loop on {} at {:.1} Hz",
                    described,
                    1.0 / pacer.period().as_secs_f64()
                );

                while !shutdown.load(Ordering::SeqCst) {
                    let tick_start = Instant::now();
                    let decision = pacer.begin();

                    let Some(mut frame) = capture.next(pacer.period()) else {
                        if capture.is_finished() {
                            info!("Video source finished, display loop stopping");
                            break;
                        }
                        continue;
                    };

                    run_tick(
                        decision,
                        &mut frame,
                        &sources,
                        &mut compositor,
                        display.as_mut(),
                        &mut pacer,
                        &stats,
                    );

                    let remaining = pacer.remaining(tick_start, Instant::now());
                    if !remaining.is_zero() {
                        std::thread::sleep(remaining);
                    }
                }

                capture.join();
                let presents = display.presents();
                debug!("Display loop stopped after {} presents", presents);
            })?;

        Ok(Self { handle })
    }

    /// Whether the thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to exit
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("Display thread panicked");
        }
    }
}
