//! Application Configuration
//!
//! Loaded once at startup from a TOML file with `DASHCAM__SECTION__KEY`
//! environment overrides. Every field is required; there are no serde
//! defaults, so a missing key is a startup error rather than a silent guess.

use can_protocol::ChannelConfig;
use overlay::{OverlayConfig, OverlayError, PacingConfig};
use position::{PositionConfig, PositionError};
use present_buffer::{DisplayConfig, DisplayError};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use telemetry::{FuelConfig, ScalingConfig, TelemetryError, VehicleProfile};
use thiserror::Error;
use tracing::Level;
use video_capture::{CaptureError, VideoConfig};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "DASHCAM_CONFIG";

/// Configuration file used when `DASHCAM_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dashcam/dashcam.toml";

const ENV_PREFIX: &str = "DASHCAM";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Video(#[from] CaptureError),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

/// Log output
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    /// One JSON object per line instead of human-readable text
    pub json: bool,
}

impl LoggingConfig {
    pub fn level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.level).map_err(|_| ConfigError::Invalid {
            field: "logging.level",
            reason: format!("unknown level {:?}", self.level),
        })
    }
}

/// Vehicle bus and decoding
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleConfig {
    /// Decoder table name, e.g. `camaro_2013_lfx`
    pub profile: String,
    /// Bus channels to receive on
    pub channels: Vec<ChannelConfig>,
    pub scaling: ScalingConfig,
}

/// When the recording indicator is lit
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordingConfig {
    /// Only record while moving at or above `start_speed_mph`
    pub speed_gated: bool,
    pub start_speed_mph: f64,
}

impl RecordingConfig {
    /// Whether recording is active at `speed_mph`. With speed gating an
    /// unknown speed counts as stopped.
    pub fn is_active(&self, speed_mph: Option<f64>) -> bool {
        if !self.speed_gated {
            return true;
        }
        speed_mph.map_or(false, |speed| speed >= self.start_speed_mph)
    }
}

/// Operator HTTP API
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    pub enabled: bool,
    /// Listen address, `host:port`
    pub bind: String,
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub vehicle: VehicleConfig,
    pub fuel: FuelConfig,
    pub position: PositionConfig,
    pub video: VideoConfig,
    pub display: DisplayConfig,
    pub pacing: PacingConfig,
    pub overlay: OverlayConfig,
    pub recording: RecordingConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Load from `$DASHCAM_CONFIG` (or the default path) plus environment
    /// overrides, then validate
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(Path::new(&path))
    }

    /// Load a specific file plus environment overrides, then validate
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).required(true))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::finish(settings)
    }

    /// Parse TOML text without environment overrides, then validate
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(text, ::config::FileFormat::Toml))
            .build()?;
        Self::finish(settings)
    }

    fn finish(settings: ::config::Config) -> Result<Self, ConfigError> {
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section; the first problem found is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.level()?;

        VehicleProfile::by_name(&self.vehicle.profile)?;
        if self.vehicle.channels.is_empty() {
            return Err(ConfigError::Invalid {
                field: "vehicle.channels",
                reason: "at least one bus channel is required".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for channel in &self.vehicle.channels {
            if !seen.insert(channel.channel) {
                return Err(ConfigError::Invalid {
                    field: "vehicle.channels",
                    reason: format!("channel {} configured twice", channel.channel),
                });
            }
        }
        self.vehicle.scaling.validate()?;

        self.fuel.validate()?;
        self.position.validate()?;
        self.video.validate()?;
        self.display.validate()?;
        self.pacing.validate()?;
        self.overlay.validate(self.video.width, self.video.height)?;

        let speed = self.recording.start_speed_mph;
        if !speed.is_finite() || speed < 0.0 {
            return Err(ConfigError::Invalid {
                field: "recording.start_speed_mph",
                reason: format!("must be >= 0, got {}", speed),
            });
        }

        if self.api.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid {
                field: "api.bind",
                reason: format!("not a socket address: {:?}", self.api.bind),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = include_str!("../../../config/dashcam.toml");

    fn field_of(err: ConfigError) -> &'static str {
        match err {
            ConfigError::Invalid { field, .. } => field,
            ConfigError::Telemetry(TelemetryError::InvalidConfig { field, .. }) => field,
            ConfigError::Position(PositionError::InvalidConfig { field, .. }) => field,
            ConfigError::Video(CaptureError::InvalidConfig { field, .. }) => field,
            ConfigError::Display(DisplayError::InvalidConfig { field, .. }) => field,
            ConfigError::Overlay(OverlayError::InvalidConfig { field, .. }) => field,
            ConfigError::Telemetry(TelemetryError::UnknownProfile(_)) => "vehicle.profile",
            other => panic!("unexpected error {}", other),
        }
    }

    fn sample() -> AppConfig {
        AppConfig::from_toml_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_sample_file_is_valid() {
        let config = sample();
        assert_eq!(config.vehicle.profile, "camaro_2013_lfx");
        assert_eq!(config.vehicle.channels.len(), 1);
        assert_eq!(config.fuel.safety_margin, 1.025);
        assert_eq!(config.pacing.tick_rate_hz, 15.0);
        assert_eq!(config.overlay.elements.len(), 6);
        assert_eq!(config.logging.level().unwrap(), Level::INFO);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let text = SAMPLE.replace("safety_margin = 1.025\n", "");
        assert!(matches!(
            AppConfig::from_toml_str(&text),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_each_invalid_field_is_named() {
        let cases: Vec<(&str, Box<dyn Fn(&mut AppConfig)>)> = vec![
            ("logging.level", Box::new(|c| c.logging.level = "loud".to_string())),
            ("vehicle.profile", Box::new(|c| c.vehicle.profile = "unknown".to_string())),
            ("vehicle.channels", Box::new(|c| c.vehicle.channels.clear())),
            ("vehicle.scaling.rpm_per_bit", Box::new(|c| c.vehicle.scaling.rpm_per_bit = 0.0)),
            ("fuel.safety_margin", Box::new(|c| c.fuel.safety_margin = 0.9)),
            ("fuel.auto_reset_threshold_pct", Box::new(|c| c.fuel.auto_reset_threshold_pct = 101.0)),
            ("position.retry_attempts", Box::new(|c| c.position.retry_attempts = 0)),
            ("video.width", Box::new(|c| c.video.width = 0)),
            ("pacing.tick_rate_hz", Box::new(|c| c.pacing.tick_rate_hz = 0.0)),
            ("overlay.elements.threshold", Box::new(|c| c.overlay.elements[0].threshold = -1.0)),
            ("overlay.elements.position", Box::new(|c| c.overlay.elements[0].x = 5000)),
            ("recording.start_speed_mph", Box::new(|c| c.recording.start_speed_mph = -1.0)),
            ("api.bind", Box::new(|c| c.api.bind = "nowhere".to_string())),
        ];

        for (field, mutate) in cases {
            let mut config = sample();
            mutate(&mut config);
            let err = config.validate().unwrap_err();
            assert_eq!(field_of(err), field);
        }
    }

    #[test]
    fn test_duplicate_channel() {
        let mut config = sample();
        let first = config.vehicle.channels[0].clone();
        config.vehicle.channels.push(first);
        assert_eq!(field_of(config.validate().unwrap_err()), "vehicle.channels");
    }

    #[test]
    fn test_recording_gate() {
        let gated = RecordingConfig {
            speed_gated: true,
            start_speed_mph: 5.0,
        };
        assert!(!gated.is_active(None));
        assert!(!gated.is_active(Some(4.9)));
        assert!(gated.is_active(Some(5.0)));

        let always = RecordingConfig {
            speed_gated: false,
            start_speed_mph: 5.0,
        };
        assert!(always.is_active(None));
    }
}
