//! Per-channel receive threads
//!
//! Each configured bus channel gets its own OS thread that blocks on its
//! [`FrameSource`] and hands every frame to a [`FrameSink`] on that same
//! thread. There is no intermediate queue.

use crate::error::ProtocolError;
use crate::frame::BusFrame;
use crate::source::FrameSource;
use metrics::counter;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Receive poll interval, bounds shutdown latency
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Back-off after a receive error
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Consumer of received frames, invoked on the channel thread
pub trait FrameSink: Send + Sync {
    /// Handle one frame
    fn on_frame(&self, frame: &BusFrame);
}

/// Where a channel's frames come from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ChannelSource {
    /// Live SocketCAN interface
    Socketcan {
        /// Interface name, e.g. `can0`
        interface: String,
    },
    /// Replay of a `candump -l` log file
    Candump {
        /// Log file path
        path: PathBuf,
    },
}

/// One bus channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Channel number stamped on received frames
    pub channel: u8,
    /// Frame source
    pub source: ChannelSource,
}

/// Handle to a running channel thread
pub struct BusChannel {
    channel: u8,
    handle: JoinHandle<u64>,
}

impl BusChannel {
    /// Spawn the receive thread for one channel
    pub fn spawn<S: FrameSink + 'static>(
        channel: u8,
        mut source: Box<dyn FrameSource>,
        sink: Arc<S>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, ProtocolError> {
        let label = channel.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("can-rx-{}", channel))
            .spawn(move || {
                info!("Channel {} receiving from {}", channel, source.describe());
                let mut received: u64 = 0;

                while !shutdown.load(Ordering::SeqCst) {
                    match source.recv(RECV_TIMEOUT) {
                        Ok(Some(frame)) => {
                            received += 1;
                            counter!("can_frames_received_total", "channel" => label.clone())
                                .increment(1);
                            sink.on_frame(&frame);
                        }
                        Ok(None) => {}
                        Err(ProtocolError::Closed) => {
                            info!("Channel {} source closed", channel);
                            break;
                        }
                        Err(e) => {
                            warn!("Channel {} receive error: {}", channel, e);
                            std::thread::sleep(ERROR_BACKOFF);
                        }
                    }
                }

                debug!("Channel {} stopped after {} frames", channel, received);
                received
            })?;

        Ok(Self { channel, handle })
    }

    /// Channel number
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Wait for the thread to exit, returning the number of frames received
    pub fn join(self) -> u64 {
        match self.handle.join() {
            Ok(count) => count,
            Err(_) => {
                error!("Channel {} thread panicked", self.channel);
                0
            }
        }
    }
}
