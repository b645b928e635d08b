//! Frame sources

use crate::frame::VideoFrame;
use crate::{CaptureError, VideoConfig, VideoSourceConfig};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};
use tracing::info;

/// Blocking source of decoded frames
pub trait VideoSource: Send {
    /// Next frame, blocking until it is available
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError>;

    /// Human-readable source name for logs
    fn describe(&self) -> String;
}

/// Raw RGB24 frames of a fixed size read back to back from a stream
pub struct PipeSource<R> {
    reader: R,
    width: u32,
    height: u32,
    sequence: u32,
    opened: Instant,
    name: String,
}

impl<R: Read + Send> PipeSource<R> {
    /// Wrap a reader that yields `width * height * 3` bytes per frame
    pub fn new(reader: R, width: u32, height: u32, name: impl Into<String>) -> Self {
        Self {
            reader,
            width,
            height,
            sequence: 0,
            opened: Instant::now(),
            name: name.into(),
        }
    }
}

impl<R: Read + Send> VideoSource for PipeSource<R> {
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError> {
        let expected = VideoFrame::byte_len(self.width, self.height);
        let mut data = vec![0u8; expected];

        let mut filled = 0;
        while filled < expected {
            match self.reader.read(&mut data[filled..]) {
                Ok(0) if filled == 0 => return Err(CaptureError::EndOfStream),
                Ok(0) => {
                    return Err(CaptureError::Size {
                        expected,
                        actual: filled,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let frame = VideoFrame::new(
            data,
            self.width,
            self.height,
            self.opened.elapsed().as_nanos() as u64,
            self.sequence,
        );
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn describe(&self) -> String {
        format!("pipe:{} {}x{}", self.name, self.width, self.height)
    }
}

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Scrolling colour bars at a fixed rate
pub struct TestPattern {
    width: u32,
    height: u32,
    period: Duration,
    next_due: Instant,
    opened: Instant,
    sequence: u32,
}

impl TestPattern {
    /// Generate frames at `fps`
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let now = Instant::now();
        Self {
            width,
            height,
            period: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            next_due: now,
            opened: now,
            sequence: 0,
        }
    }

    /// Render frame `sequence` without pacing
    pub fn render(&self, sequence: u32) -> VideoFrame {
        let mut frame = VideoFrame::filled(self.width, self.height, [0, 0, 0]);
        let bar_width = (self.width / BARS.len() as u32).max(1);
        let shift = sequence % self.width.max(1);

        for y in 0..self.height {
            let row = frame.row_mut(y);
            for x in 0..self.width {
                let bar = (((x + shift) % self.width) / bar_width) as usize % BARS.len();
                let idx = x as usize * 3;
                row[idx..idx + 3].copy_from_slice(&BARS[bar]);
            }
        }

        frame.sequence = sequence;
        frame
    }
}

impl VideoSource for TestPattern {
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError> {
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = self.next_due.max(now) + self.period;

        let mut frame = self.render(self.sequence);
        frame.timestamp_ns = self.opened.elapsed().as_nanos() as u64;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn describe(&self) -> String {
        format!("test-pattern {}x{}", self.width, self.height)
    }
}

/// Open the configured source
pub fn open_source(config: &VideoConfig) -> Result<Box<dyn VideoSource>, CaptureError> {
    match &config.source {
        VideoSourceConfig::Pipe { path } => {
            let file = File::open(path)
                .map_err(|e| CaptureError::Open(format!("{}: {}", path.display(), e)))?;
            info!("Reading raw video from {}", path.display());
            Ok(Box::new(PipeSource::new(
                file,
                config.width,
                config.height,
                path.display().to_string(),
            )))
        }
        VideoSourceConfig::TestPattern => Ok(Box::new(TestPattern::new(
            config.width,
            config.height,
            config.fps,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_pipe_reads_whole_frames() {
        let bytes: Vec<u8> = (0..(2 * 2 * 3 * 2)).map(|i| i as u8).collect();
        let mut source = PipeSource::new(Cursor::new(bytes), 2, 2, "test");

        let first = source.next_frame().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.get_pixel(0, 0), Some([0, 1, 2]));

        let second = source.next_frame().unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.get_pixel(0, 0), Some([12, 13, 14]));

        assert!(matches!(source.next_frame(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn test_pipe_truncated_frame() {
        let mut source = PipeSource::new(Cursor::new(vec![0u8; 7]), 2, 2, "test");
        assert!(matches!(
            source.next_frame(),
            Err(CaptureError::Size { expected: 12, actual: 7 })
        ));
    }

    #[test]
    fn test_pattern_bars() {
        let pattern = TestPattern::new(80, 4, 30);
        let frame = pattern.render(0);
        assert_eq!(frame.get_pixel(0, 0), Some([255, 255, 255]));
        assert_eq!(frame.get_pixel(79, 3), Some([0, 0, 0]));
        assert_eq!(frame.get_pixel(15, 0), Some([255, 255, 0]));
    }

    #[test]
    fn test_pattern_paces_frames() {
        let mut pattern = TestPattern::new(8, 2, 50);
        let start = Instant::now();
        for _ in 0..4 {
            pattern.next_frame().unwrap();
        }
        // First frame is immediate, three periods of 20 ms follow
        assert!(start.elapsed() >= Duration::from_millis(55));
    }
}
