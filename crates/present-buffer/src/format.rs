//! Pixel formats

use serde::Deserialize;

/// Display pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 16-bit 5-6-5, little endian (typical fbdev panels)
    Rgb565,
    /// 32-bit B, G, R, X byte order in memory (DRM XRGB8888)
    Xrgb8888,
}

impl PixelFormat {
    /// Bytes per pixel
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Xrgb8888 => 4,
        }
    }

    /// Encode one pixel into `out` (exactly `bytes_per_pixel` long)
    #[inline]
    pub fn encode(self, rgb: &[u8], out: &mut [u8]) {
        match self {
            PixelFormat::Rgb565 => out.copy_from_slice(&rgb565(rgb[0], rgb[1], rgb[2]).to_le_bytes()),
            PixelFormat::Xrgb8888 => out.copy_from_slice(&[rgb[2], rgb[1], rgb[0], 0xFF]),
        }
    }

    /// Decode one pixel back to RGB. 5/6-bit channels are widened by shifting.
    pub fn decode(self, px: &[u8]) -> [u8; 3] {
        match self {
            PixelFormat::Rgb565 => {
                let v = u16::from_le_bytes([px[0], px[1]]);
                [
                    ((v >> 11) as u8 & 0x1F) << 3,
                    ((v >> 5) as u8 & 0x3F) << 2,
                    (v as u8 & 0x1F) << 3,
                ]
            }
            PixelFormat::Xrgb8888 => [px[2], px[1], px[0]],
        }
    }
}

/// Pack 8-bit RGB into 5-6-5
#[inline]
pub fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}
