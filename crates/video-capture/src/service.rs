//! Capture service thread
//!
//! The hand-off is a single slot. A new frame overwrites one the tick thread
//! has not taken yet, so the compositor always gets the newest frame.

use crate::frame::VideoFrame;
use crate::source::VideoSource;
use crate::CaptureError;
use metrics::counter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct SlotState {
    frame: Option<VideoFrame>,
    closed: bool,
}

/// Latest-frame hand-off between the capture and tick threads
#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A frame slot holds no invariant a panic could break
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `frame`, returning true if an untaken frame was replaced.
    /// `None` once the consumer has gone away.
    fn put(&self, frame: VideoFrame) -> Option<bool> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let replaced = state.frame.replace(frame).is_some();
        drop(state);
        self.ready.notify_one();
        Some(replaced)
    }

    fn take(&self, timeout: Duration) -> Option<VideoFrame> {
        let state = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.frame.is_none() && !s.closed)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.frame.take()
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}

/// Background capture with a single-frame, newest-wins hand-off
pub struct CaptureService {
    slot: Arc<Slot>,
    dropped: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl CaptureService {
    /// Spawn the capture thread
    pub fn spawn(
        mut source: Box<dyn VideoSource>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, CaptureError> {
        let slot = Arc::new(Slot::default());
        let producer = slot.clone();
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_clone = dropped.clone();

        let handle = std::thread::Builder::new()
            .name("video-capture".to_string())
            .spawn(move || {
                info!("Capturing from {}", source.describe());

                while !shutdown.load(Ordering::SeqCst) {
                    match source.next_frame() {
                        Ok(frame) => match producer.put(frame) {
                            Some(false) => {}
                            Some(true) => {
                                dropped_clone.fetch_add(1, Ordering::Relaxed);
                                counter!("video_frames_dropped_total").increment(1);
                            }
                            None => {
                                debug!("Video consumer gone");
                                break;
                            }
                        },
                        Err(CaptureError::EndOfStream) => {
                            info!("Video stream ended");
                            break;
                        }
                        Err(e) => {
                            warn!("Video read error: {}", e);
                            std::thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
            })
            .map_err(|e| CaptureError::Open(e.to_string()))?;

        Ok(Self {
            slot,
            dropped,
            handle,
        })
    }

    /// Wait up to `timeout` for a frame and take the newest one
    pub fn next(&self, timeout: Duration) -> Option<VideoFrame> {
        self.slot.take(timeout)
    }

    /// Whether the capture thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Frames overwritten before the tick thread took them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting frames and wait for the capture thread
    pub fn join(self) {
        self.slot.close();
        if self.handle.join().is_err() {
            error!("Capture thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PipeSource;
    use std::io::Cursor;

    #[test]
    fn test_slow_consumer_gets_newest_frame() {
        let bytes = vec![7u8; 2 * 2 * 3 * 10];
        let source = Box::new(PipeSource::new(Cursor::new(bytes), 2, 2, "test"));
        let service = CaptureService::spawn(source, Arc::new(AtomicBool::new(false))).unwrap();

        // Let the producer run through the whole stream without consuming
        while !service.is_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }

        let latest = service.next(Duration::from_millis(100)).unwrap();
        assert_eq!(latest.sequence, 9);
        assert!(service.next(Duration::from_millis(10)).is_none());
        assert_eq!(service.dropped(), 9);
        service.join();
    }

    #[test]
    fn test_consumer_keeps_up_without_drops() {
        let bytes = vec![1u8; 2 * 2 * 3 * 3];
        let source = Box::new(PipeSource::new(Cursor::new(bytes), 2, 2, "test"));
        let service = CaptureService::spawn(source, Arc::new(AtomicBool::new(false))).unwrap();

        let mut seen = Vec::new();
        while let Some(frame) = service.next(Duration::from_millis(200)) {
            seen.push(frame.sequence);
        }
        // Sequences only move forward, and the last frame always arrives
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&2));
        assert_eq!(seen.len() as u64 + service.dropped(), 3);
        service.join();
    }

    #[test]
    fn test_next_times_out() {
        struct Never;
        impl VideoSource for Never {
            fn next_frame(&mut self) -> Result<VideoFrame, CaptureError> {
                std::thread::sleep(Duration::from_millis(5));
                Err(CaptureError::Read("no signal".to_string()))
            }
            fn describe(&self) -> String {
                "never".to_string()
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let service = CaptureService::spawn(Box::new(Never), shutdown.clone()).unwrap();
        assert!(service.next(Duration::from_millis(20)).is_none());
        shutdown.store(true, Ordering::SeqCst);
        service.join();
    }
}
