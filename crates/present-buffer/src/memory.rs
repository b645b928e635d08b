//! Heap-backed double buffer

use crate::buffer::PresentationBuffer;
use crate::display::{Display, Geometry};
use crate::format::PixelFormat;
use crate::DisplayError;

/// Two heap pages with a front index
pub struct MemoryDisplay {
    geometry: Geometry,
    pages: [Vec<u8>; 2],
    front: usize,
    presents: u64,
}

impl MemoryDisplay {
    /// Allocate two zeroed pages
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let geometry = Geometry {
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            format,
        };
        let len = geometry.page_len();
        Self {
            geometry,
            pages: [vec![0u8; len], vec![0u8; len]],
            front: 0,
            presents: 0,
        }
    }

    /// Page currently shown
    pub fn front_page(&self) -> &[u8] {
        &self.pages[self.front]
    }

    /// Read a pixel from the front page
    pub fn front_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        let bpp = self.geometry.format.bytes_per_pixel();
        let at = y as usize * self.geometry.stride + x as usize * bpp;
        Some(self.geometry.format.decode(&self.pages[self.front][at..at + bpp]))
    }

    /// Index of the front page (0 or 1)
    pub fn front_index(&self) -> usize {
        self.front
    }
}

impl Display for MemoryDisplay {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn back_buffer(&mut self) -> Result<PresentationBuffer<'_>, DisplayError> {
        let g = self.geometry;
        let back = 1 - self.front;
        PresentationBuffer::new(g.width, g.height, g.stride, g.format, &mut self.pages[back])
    }

    fn present(&mut self) -> Result<(), DisplayError> {
        self.front = 1 - self.front;
        self.presents += 1;
        Ok(())
    }

    fn presents(&self) -> u64 {
        self.presents
    }

    fn describe(&self) -> String {
        format!("memory {}x{}", self.geometry.width, self.geometry.height)
    }
}
