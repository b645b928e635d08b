//! Video Capture
//!
//! Receives decoded RGB24 frames from the external capture pipeline and hands
//! them to the display tick thread. Camera control and encoding live outside
//! this process; frames arrive over a FIFO or file, or from a built-in test
//! pattern for bench work.
//!
//! The hand-off holds a single frame. When the compositor is busy a newer
//! frame replaces the waiting one, so the tick always composites the latest
//! capture.

mod frame;
mod service;
mod source;

pub use frame::VideoFrame;
pub use service::CaptureService;
pub use source::{open_source, PipeSource, TestPattern, VideoSource};

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Capture error types
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open video source: {0}")]
    Open(String),

    #[error("Video read failed: {0}")]
    Read(String),

    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    Size { expected: usize, actual: usize },

    #[error("Video stream ended")]
    EndOfStream,

    #[error("Invalid configuration field {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Read(err.to_string())
    }
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum VideoSourceConfig {
    /// Raw RGB24 frames read from a FIFO or file
    Pipe {
        /// FIFO or file path
        path: PathBuf,
    },
    /// Generated colour bars
    TestPattern,
}

/// Video ingest configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Nominal frame rate
    pub fps: u32,
    /// Frame source
    pub source: VideoSourceConfig,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 15,
            source: VideoSourceConfig::TestPattern,
        }
    }
}

impl VideoConfig {
    /// Reject zero-sized or zero-rate video
    pub fn validate(&self) -> Result<(), CaptureError> {
        for (field, value) in [
            ("video.width", self.width),
            ("video.height", self.height),
            ("video.fps", self.fps),
        ] {
            if value == 0 {
                return Err(CaptureError::InvalidConfig {
                    field,
                    reason: "must be greater than 0".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialize() {
        let json = r#"{"width": 1280, "height": 720, "fps": 30,
            "source": {"kind": "pipe", "path": "/run/dashcam/video.rgb"}}"#;
        let config: VideoConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.width, 1280);
        assert_eq!(
            config.source,
            VideoSourceConfig::Pipe {
                path: PathBuf::from("/run/dashcam/video.rgb")
            }
        );
        assert!(config.validate().is_ok());

        let pattern = r#"{"width": 64, "height": 48, "fps": 15, "source": {"kind": "test_pattern"}}"#;
        let config: VideoConfig = serde_json::from_str(pattern).unwrap();
        assert_eq!(config.source, VideoSourceConfig::TestPattern);
    }

    #[test]
    fn test_validate_names_zero_field() {
        let config = VideoConfig {
            fps: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CaptureError::InvalidConfig { field: "video.fps", .. })
        ));
    }
}
