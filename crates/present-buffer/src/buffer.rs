//! Borrowed back-page view

use crate::format::PixelFormat;
use crate::DisplayError;

/// A display page lent to the compositor for one cycle
pub struct PresentationBuffer<'a> {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: &'a mut [u8],
}

impl<'a> PresentationBuffer<'a> {
    /// Wrap raw page memory. `stride` is the row pitch in bytes and may
    /// include padding.
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        data: &'a mut [u8],
    ) -> Result<Self, DisplayError> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        if stride < row_bytes {
            return Err(DisplayError::BufferSize {
                needed: row_bytes,
                actual: stride,
            });
        }
        let needed = stride * height as usize;
        if data.len() < needed {
            return Err(DisplayError::BufferSize {
                needed,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row pitch in bytes
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Pixel layout
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Pack an RGB24 image into the page.
    ///
    /// Scales with nearest-neighbour sampling when the source size differs
    /// from the page size. Stride padding is left untouched.
    pub fn write_rgb(&mut self, rgb: &[u8], src_width: u32, src_height: u32) -> Result<(), DisplayError> {
        let expected = src_width as usize * src_height as usize * 3;
        if expected == 0 || rgb.len() != expected {
            return Err(DisplayError::SourceSize {
                expected,
                actual: rgb.len(),
            });
        }

        let bpp = self.format.bytes_per_pixel();
        let src_w = src_width as usize;
        let x_map: Vec<usize> = (0..self.width as usize)
            .map(|dx| dx * src_w / self.width as usize)
            .collect();

        for dy in 0..self.height as usize {
            let sy = dy * src_height as usize / self.height as usize;
            let src_row = &rgb[sy * src_w * 3..(sy + 1) * src_w * 3];
            let start = dy * self.stride;
            let dst_row = &mut self.data[start..start + self.width as usize * bpp];

            for (dst, &sx) in dst_row.chunks_exact_mut(bpp).zip(&x_map) {
                self.format.encode(&src_row[sx * 3..sx * 3 + 3], dst);
            }
        }

        Ok(())
    }

    /// Fill the visible area with one colour
    pub fn fill(&mut self, rgb: [u8; 3]) {
        let bpp = self.format.bytes_per_pixel();
        for dy in 0..self.height as usize {
            let start = dy * self.stride;
            for dst in self.data[start..start + self.width as usize * bpp].chunks_exact_mut(bpp) {
                self.format.encode(&rgb, dst);
            }
        }
    }

    /// Read back one pixel as RGB
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let at = y as usize * self.stride + x as usize * bpp;
        Some(self.format.decode(&self.data[at..at + bpp]))
    }
}
