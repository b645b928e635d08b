//! Dashcam Appliance - Main Entry Point

use anyhow::Context;
use dashcam::app::Appliance;
use dashcam::settings::AppConfig;
use dashcam::{init_logging, run_server};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    init_logging(config.logging.level()?, config.logging.json)
        .context("installing log subscriber")?;

    info!("=== Dashcam v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics exporter unavailable: {}", e);
            None
        }
    };

    let app = Appliance::start(&config, metrics)?;
    let state = app.state();

    if config.api.enabled {
        let bind = config.api.bind.clone();
        tokio::spawn(async move {
            let shutdown = async {
                tokio::signal::ctrl_c().await.ok();
            };
            if let Err(e) = run_server(&bind, state, shutdown).await {
                error!("API server failed: {}", e);
            }
        });
    }

    // Stop on Ctrl-C, or when a file-backed video source runs out
    let mut poll = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                break;
            }
            _ = poll.tick() => {
                if app.is_display_finished() {
                    info!("Display loop finished");
                    break;
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || app.shutdown())
        .await
        .context("joining worker threads")?;

    Ok(())
}
