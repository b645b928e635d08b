//! Linux framebuffer double buffer
//!
//! Maps `/dev/fbN` and, when the driver allows a virtual height of two
//! screens, page-flips with `FBIOPAN_DISPLAY`. Otherwise the compositor draws
//! into a private page that is copied to the mapped screen on present.

use crate::buffer::PresentationBuffer;
use crate::display::{Display, Geometry};
use crate::format::PixelFormat;
use crate::DisplayError;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use tracing::{info, warn};

const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;
const FBIOPUT_VSCREENINFO: libc::c_ulong = 0x4601;
const FBIOGET_FSCREENINFO: libc::c_ulong = 0x4602;
const FBIOPAN_DISPLAY: libc::c_ulong = 0x4606;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

/// `struct fb_var_screeninfo`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct FbVarScreenInfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

/// `struct fb_fix_screeninfo`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct FbFixScreenInfo {
    id: [u8; 16],
    smem_start: libc::c_ulong,
    smem_len: u32,
    type_: u32,
    type_aux: u32,
    visual: u32,
    xpanstep: u16,
    ypanstep: u16,
    ywrapstep: u16,
    line_length: u32,
    mmio_start: libc::c_ulong,
    mmio_len: u32,
    accel: u32,
    capabilities: u16,
    reserved: [u16; 2],
}

/// Shared mapping of framebuffer memory
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is owned by exactly one FbdevDisplay, which is only
// accessed from the tick thread.
unsafe impl Send for Mapping {}

impl Mapping {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len come from a successful mmap that lives as long as self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

enum FlipMode {
    /// Two screens in video memory; `back` is the page not being scanned out
    Pan { back: usize },
    /// One screen in video memory plus a private back page
    Shadow { page: Vec<u8> },
}

/// Framebuffer display with two pages
pub struct FbdevDisplay {
    file: File,
    var: FbVarScreenInfo,
    map: Mapping,
    geometry: Geometry,
    mode: FlipMode,
    presents: u64,
    name: String,
}

fn ioctl<T>(file: &File, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), request as _, arg as *mut T) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl FbdevDisplay {
    /// Open and map a framebuffer device
    pub fn open(path: &Path) -> Result<Self, DisplayError> {
        let name = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DisplayError::Open(format!("{}: {}", name, e)))?;

        let mut var = FbVarScreenInfo::default();
        ioctl(&file, FBIOGET_VSCREENINFO, &mut var)
            .map_err(|e| DisplayError::Open(format!("{}: FBIOGET_VSCREENINFO: {}", name, e)))?;

        let format = match (var.bits_per_pixel, var.red.offset) {
            (16, _) => PixelFormat::Rgb565,
            (32, 16) => PixelFormat::Xrgb8888,
            (bpp, red) => {
                return Err(DisplayError::Unsupported(format!(
                    "{} bpp with red at bit {}",
                    bpp, red
                )))
            }
        };

        // Ask for a second screen of virtual height so we can pan between pages
        if var.yres_virtual < var.yres * 2 {
            let mut wanted = var;
            wanted.yres_virtual = var.yres * 2;
            wanted.yoffset = 0;
            match ioctl(&file, FBIOPUT_VSCREENINFO, &mut wanted) {
                Ok(()) => var = wanted,
                Err(e) => warn!("{}: cannot enlarge virtual screen: {}", name, e),
            }
            ioctl(&file, FBIOGET_VSCREENINFO, &mut var)
                .map_err(|e| DisplayError::Open(format!("{}: FBIOGET_VSCREENINFO: {}", name, e)))?;
        }

        let mut fix = FbFixScreenInfo::default();
        ioctl(&file, FBIOGET_FSCREENINFO, &mut fix)
            .map_err(|e| DisplayError::Open(format!("{}: FBIOGET_FSCREENINFO: {}", name, e)))?;

        let geometry = Geometry {
            width: var.xres,
            height: var.yres,
            stride: fix.line_length as usize,
            format,
        };
        let page_len = geometry.page_len();
        let can_pan = var.yres_virtual >= var.yres * 2 && fix.smem_len as usize >= page_len * 2;
        let map_len = if can_pan { page_len * 2 } else { page_len };

        if (fix.smem_len as usize) < page_len {
            return Err(DisplayError::BufferSize {
                needed: page_len,
                actual: fix.smem_len as usize,
            });
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(DisplayError::Open(format!(
                "{}: mmap: {}",
                name,
                io::Error::last_os_error()
            )));
        }
        let map = Mapping {
            ptr: ptr as *mut u8,
            len: map_len,
        };

        let mode = if can_pan {
            FlipMode::Pan { back: 1 }
        } else {
            FlipMode::Shadow {
                page: vec![0u8; page_len],
            }
        };

        info!(
            "Opened {} {}x{} {:?} stride {} ({})",
            name,
            geometry.width,
            geometry.height,
            format,
            geometry.stride,
            if can_pan { "page flip" } else { "shadow copy" }
        );

        let mut display = Self {
            file,
            var,
            map,
            geometry,
            mode,
            presents: 0,
            name,
        };
        if can_pan {
            display.pan_to(0)?;
        }
        Ok(display)
    }

    fn pan_to(&mut self, page: usize) -> Result<(), DisplayError> {
        self.var.xoffset = 0;
        self.var.yoffset = page as u32 * self.geometry.height;
        ioctl(&self.file, FBIOPAN_DISPLAY, &mut self.var)
            .map_err(|e| DisplayError::Present(format!("{}: FBIOPAN_DISPLAY: {}", self.name, e)))
    }
}

impl Display for FbdevDisplay {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn back_buffer(&mut self) -> Result<PresentationBuffer<'_>, DisplayError> {
        let g = self.geometry;
        let page_len = g.page_len();
        let page: &mut [u8] = match &mut self.mode {
            FlipMode::Pan { back } => {
                let start = *back * page_len;
                &mut self.map.as_mut_slice()[start..start + page_len]
            }
            FlipMode::Shadow { page } => page.as_mut_slice(),
        };
        PresentationBuffer::new(g.width, g.height, g.stride, g.format, page)
    }

    fn present(&mut self) -> Result<(), DisplayError> {
        match self.mode {
            FlipMode::Pan { back } => {
                self.pan_to(back)?;
                self.mode = FlipMode::Pan { back: 1 - back };
            }
            FlipMode::Shadow { ref page } => {
                self.map.as_mut_slice()[..page.len()].copy_from_slice(page);
            }
        }
        self.presents += 1;
        Ok(())
    }

    fn presents(&self) -> u64 {
        self.presents
    }

    fn describe(&self) -> String {
        format!("fbdev {}", self.name)
    }
}
