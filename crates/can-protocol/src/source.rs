//! Frame sources
//!
//! A [`FrameSource`] yields frames from one bus channel. Live vehicles use
//! SocketCAN; bench setups replay a `candump -l` log.

use crate::channel::ChannelSource;
use crate::error::ProtocolError;
use crate::frame::BusFrame;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Receive-only source of bus frames
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns `Ok(None)` when the timeout elapses with nothing received and
    /// `Err(ProtocolError::Closed)` when the source is exhausted.
    fn recv(&mut self, timeout: Duration) -> Result<Option<BusFrame>, ProtocolError>;

    /// Human-readable source name for logs
    fn describe(&self) -> String;
}

/// In-memory frame queue, used for log replay and tests
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: VecDeque<BusFrame>,
    name: String,
}

impl ReplaySource {
    /// Create a source that yields `frames` in order
    pub fn new(name: impl Into<String>, frames: impl IntoIterator<Item = BusFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            name: name.into(),
        }
    }

    /// Parse a `candump -l` log.
    ///
    /// Each line has the form `(1436509052.249713) can0 0C9#0102030405`.
    /// Timestamps are rebased so the first frame arrives at `base`. Lines that
    /// do not parse are skipped with a warning.
    pub fn from_candump<R: BufRead>(
        reader: R,
        channel: u8,
        base: Instant,
    ) -> Result<Self, ProtocolError> {
        let mut frames = VecDeque::new();
        let mut first_ts: Option<f64> = None;

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parsed = parse_candump_line(line).and_then(|(ts, id, extended, payload)| {
                let origin = first_ts.unwrap_or(ts);
                let offset = Duration::from_secs_f64((ts - origin).max(0.0));
                let timestamp = base + offset;
                let frame = if extended {
                    BusFrame::new_extended(id, &payload, channel, timestamp)?
                } else {
                    BusFrame::new(id, &payload, channel, timestamp)?
                };
                Ok((ts, frame))
            });

            match parsed {
                Ok((ts, frame)) => {
                    first_ts.get_or_insert(ts);
                    frames.push_back(frame);
                }
                Err(e) => warn!("Skipping candump line {}: {}", lineno + 1, e),
            }
        }

        debug!("Loaded {} frames from candump log", frames.len());
        Ok(Self {
            frames,
            name: "candump".to_string(),
        })
    }

    /// Frames not yet delivered
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    fn recv(&mut self, _timeout: Duration) -> Result<Option<BusFrame>, ProtocolError> {
        self.frames.pop_front().map(Some).ok_or(ProtocolError::Closed)
    }

    fn describe(&self) -> String {
        format!("replay:{}", self.name)
    }
}

fn parse_candump_line(line: &str) -> Result<(f64, u32, bool, Vec<u8>), ProtocolError> {
    let mut parts = line.split_whitespace();
    let ts = parts
        .next()
        .and_then(|t| t.strip_prefix('(')?.strip_suffix(')'))
        .ok_or_else(|| ProtocolError::Malformed("missing timestamp".to_string()))?
        .parse::<f64>()
        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let _iface = parts
        .next()
        .ok_or_else(|| ProtocolError::Malformed("missing interface".to_string()))?;
    let body = parts
        .next()
        .ok_or_else(|| ProtocolError::Malformed("missing frame".to_string()))?;

    let (id_hex, data_hex) = body
        .split_once('#')
        .ok_or_else(|| ProtocolError::Malformed(format!("no '#' in {}", body)))?;
    if data_hex.starts_with('R') {
        return Err(ProtocolError::Malformed("remote frame".to_string()));
    }

    let id = u32::from_str_radix(id_hex, 16)
        .map_err(|e| ProtocolError::Malformed(format!("id {}: {}", id_hex, e)))?;
    let extended = id_hex.len() > 3;

    if !data_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::Malformed(format!("non-hex payload {}", data_hex)));
    }
    if data_hex.len() % 2 != 0 {
        return Err(ProtocolError::Malformed(format!("odd payload {}", data_hex)));
    }
    let payload = data_hex
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| ProtocolError::Malformed(format!("bad byte in {}", data_hex)))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    Ok((ts, id, extended, payload))
}

/// Open the source described by a channel configuration.
///
/// Live interfaces only deliver `filter_ids` when the list is non-empty.
pub fn open_source(
    channel: u8,
    source: &ChannelSource,
    filter_ids: &[u32],
) -> Result<Box<dyn FrameSource>, ProtocolError> {
    match source {
        #[cfg(target_os = "linux")]
        ChannelSource::Socketcan { interface } => {
            let socket = crate::socketcan::SocketCanSource::open(interface, channel)?;
            if !filter_ids.is_empty() {
                socket.set_filters(filter_ids)?;
            }
            Ok(Box::new(socket))
        }
        #[cfg(not(target_os = "linux"))]
        ChannelSource::Socketcan { interface } => Err(ProtocolError::Open(format!(
            "SocketCAN unavailable on this platform: {}",
            interface
        ))),
        ChannelSource::Candump { path } => {
            let file = File::open(path)
                .map_err(|e| ProtocolError::Open(format!("{}: {}", path.display(), e)))?;
            Ok(Box::new(ReplaySource::from_candump(
                BufReader::new(file),
                channel,
                Instant::now(),
            )?))
        }
    }
}
