//! Display abstraction

use crate::buffer::PresentationBuffer;
use crate::format::PixelFormat;
use crate::memory::MemoryDisplay;
use crate::DisplayError;
use serde::Deserialize;
use std::path::PathBuf;

/// Page geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Visible width in pixels
    pub width: u32,
    /// Visible height in pixels
    pub height: u32,
    /// Row pitch in bytes
    pub stride: usize,
    /// Pixel layout
    pub format: PixelFormat,
}

impl Geometry {
    /// Bytes in one page
    pub fn page_len(&self) -> usize {
        self.stride * self.height as usize
    }
}

/// A double-buffered output surface
pub trait Display: Send {
    /// Page geometry
    fn geometry(&self) -> Geometry;

    /// Lend the back page. The front page is never handed out.
    fn back_buffer(&mut self) -> Result<PresentationBuffer<'_>, DisplayError>;

    /// Make the back page visible and recycle the old front page
    fn present(&mut self) -> Result<(), DisplayError>;

    /// Number of successful presents
    fn presents(&self) -> u64;

    /// Human-readable name for logs
    fn describe(&self) -> String;
}

/// Output device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DisplayDevice {
    /// Linux framebuffer device; geometry comes from the driver
    Fbdev {
        /// Device node, e.g. `/dev/fb0`
        path: PathBuf,
    },
    /// Heap pages, for bench runs without a panel
    Memory {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
        /// Pixel layout
        pixel_format: PixelFormat,
    },
}

/// Display configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    /// Output device
    pub device: DisplayDevice,
    /// Flip horizontally (rear-view mirror mounting)
    pub mirror: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            device: DisplayDevice::Memory {
                width: 1920,
                height: 1080,
                pixel_format: PixelFormat::Xrgb8888,
            },
            mirror: false,
        }
    }
}

impl DisplayConfig {
    /// Reject zero-sized memory displays
    pub fn validate(&self) -> Result<(), DisplayError> {
        if let DisplayDevice::Memory { width, height, .. } = self.device {
            if width == 0 || height == 0 {
                return Err(DisplayError::InvalidConfig {
                    field: "display.device",
                    reason: format!("zero-sized display {}x{}", width, height),
                });
            }
        }
        Ok(())
    }
}

/// Open the configured display
pub fn open_display(config: &DisplayConfig) -> Result<Box<dyn Display>, DisplayError> {
    match &config.device {
        DisplayDevice::Memory {
            width,
            height,
            pixel_format,
        } => Ok(Box::new(MemoryDisplay::new(*width, *height, *pixel_format))),
        #[cfg(target_os = "linux")]
        DisplayDevice::Fbdev { path } => Ok(Box::new(crate::fbdev::FbdevDisplay::open(path)?)),
        #[cfg(not(target_os = "linux"))]
        DisplayDevice::Fbdev { path } => Err(DisplayError::Open(format!(
            "framebuffer unavailable on this platform: {}",
            path.display()
        ))),
    }
}
