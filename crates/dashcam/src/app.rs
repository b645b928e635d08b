//! Startup Wiring
//!
//! Builds every component from a validated [`AppConfig`] and owns the thread
//! handles until shutdown.

use crate::pipeline::{DisplayLoop, TickSources, TickStats};
use crate::settings::AppConfig;
use crate::AppState;
use anyhow::Context;
use can_protocol::BusChannel;
use metrics_exporter_prometheus::PrometheusHandle;
use overlay::{Compositor, FramePacer};
use position::{GpsdSource, PositionService, SharedPosition};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use telemetry::{Decoder, SharedTelemetry, VehicleProfile};
use tracing::{info, warn};
use video_capture::CaptureService;

/// Running appliance
pub struct Appliance {
    shutdown: Arc<AtomicBool>,
    channels: Vec<BusChannel>,
    position: Option<PositionService>,
    display: DisplayLoop,
    state: Arc<AppState>,
}

impl Appliance {
    /// Open every source and start all threads.
    ///
    /// If any step fails the threads already started are told to stop.
    pub fn start(config: &AppConfig, metrics: Option<PrometheusHandle>) -> anyhow::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let started = Self::start_with(config, metrics, shutdown.clone());
        if started.is_err() {
            shutdown.store(true, Ordering::SeqCst);
        }
        started
    }

    fn start_with(
        config: &AppConfig,
        metrics: Option<PrometheusHandle>,
        shutdown: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let profile = VehicleProfile::by_name(&config.vehicle.profile)?;
        let telemetry = Arc::new(SharedTelemetry::new(config.fuel));
        let decoder = Arc::new(Decoder::new(
            profile,
            config.vehicle.scaling,
            telemetry.clone(),
        ));

        let filter_ids = profile.identifiers();
        let mut channels = Vec::with_capacity(config.vehicle.channels.len());
        for channel in &config.vehicle.channels {
            let source = can_protocol::open_source(channel.channel, &channel.source, &filter_ids)
                .with_context(|| format!("opening bus channel {}", channel.channel))?;
            channels.push(BusChannel::spawn(
                channel.channel,
                source,
                decoder.clone(),
                shutdown.clone(),
            )?);
        }

        let (position, position_service) = if config.position.enabled {
            let shared = Arc::new(SharedPosition::new(config.position.stale_after()));
            let source = GpsdSource::new(
                config.position.gpsd_address.clone(),
                config.position.read_timeout(),
            );
            let service = PositionService::spawn(
                Box::new(source),
                shared.clone(),
                config.position.clone(),
                shutdown.clone(),
            )?;
            (Some(shared), Some(service))
        } else {
            info!("Position service disabled");
            (None, None)
        };

        let video = video_capture::open_source(&config.video).context("opening video source")?;
        let capture = CaptureService::spawn(video, shutdown.clone())?;

        let display = present_buffer::open_display(&config.display).context("opening display")?;
        let geometry = display.geometry();
        if geometry.width != config.video.width || geometry.height != config.video.height {
            warn!(
                "Display is {}x{}, video {}x{}; frames will be rescaled",
                geometry.width, geometry.height, config.video.width, config.video.height
            );
        }

        let ticks = Arc::new(TickStats::default());
        let display = DisplayLoop::spawn(
            capture,
            display,
            Compositor::new(config.overlay.clone(), config.display.mirror),
            FramePacer::new(&config.pacing),
            TickSources {
                telemetry: telemetry.clone(),
                position: position.clone(),
                recording: config.recording,
            },
            ticks.clone(),
            shutdown.clone(),
        )?;

        let state = Arc::new(AppState::new(telemetry, decoder, position, ticks, metrics));

        info!(
            "Appliance started: {} bus channel(s), profile {}",
            channels.len(),
            profile.name
        );

        Ok(Self {
            shutdown,
            channels,
            position: position_service,
            display,
            state,
        })
    }

    /// State for the operator API
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Whether the display loop has exited on its own (end of video)
    pub fn is_display_finished(&self) -> bool {
        self.display.is_finished()
    }

    /// Stop every thread and wait for them
    pub fn shutdown(self) {
        info!("Shutting down");
        self.shutdown.store(true, Ordering::SeqCst);

        self.display.join();
        for channel in self.channels {
            let id = channel.channel();
            let received = channel.join();
            info!("Channel {} received {} frames", id, received);
        }
        if let Some(position) = self.position {
            position.join();
        }
    }
}
