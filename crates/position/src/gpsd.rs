//! gpsd JSON client
//!
//! Speaks the gpsd watch protocol over TCP: send `?WATCH` once, then read one
//! JSON object per line. Only `TPV` (position/velocity) and `SKY` (satellite)
//! reports are used; everything else is skipped.

use crate::error::PositionError;
use crate::fix::{FixQuality, PositionFix};
use crate::service::PositionSource;
use serde::Deserialize;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// A decoded report
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Report {
    /// Position and velocity
    Fix(PositionFix),
    /// Satellites used in the current solution
    Satellites(u8),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum Message {
    #[serde(rename = "TPV")]
    Tpv(Tpv),
    #[serde(rename = "SKY")]
    Sky(Sky),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    speed: Option<f64>,
    track: Option<f64>,
    alt: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SkySatellite {
    #[serde(default)]
    used: bool,
}

#[derive(Debug, Deserialize)]
struct Sky {
    #[serde(rename = "uSat")]
    used: Option<u8>,
    #[serde(default)]
    satellites: Vec<SkySatellite>,
}

/// Parse one gpsd JSON line. `Ok(None)` for reports that carry nothing
/// usable (other classes, TPV without coordinates).
pub fn parse_report(line: &str, received_at: Instant) -> Result<Option<Report>, PositionError> {
    let message: Message =
        serde_json::from_str(line).map_err(|e| PositionError::Parse(e.to_string()))?;

    Ok(match message {
        Message::Tpv(tpv) => match (tpv.lat, tpv.lon) {
            (Some(lat), Some(lon)) => Some(Report::Fix(PositionFix {
                lat,
                lon,
                speed_mps: tpv.speed.unwrap_or(0.0).max(0.0),
                heading_deg: tpv.track,
                altitude_m: tpv.alt_msl.or(tpv.alt),
                fix: FixQuality::from_mode(tpv.mode),
                satellites: None,
                received_at,
            })),
            _ => None,
        },
        Message::Sky(sky) => {
            let used = sky
                .used
                .unwrap_or_else(|| sky.satellites.iter().filter(|s| s.used).count().min(255) as u8);
            Some(Report::Satellites(used))
        }
        Message::Other => None,
    })
}

/// TCP client for a local gpsd
pub struct GpsdSource {
    address: String,
    read_timeout: Duration,
    reader: Option<BufReader<TcpStream>>,
    pending: Vec<u8>,
}

impl GpsdSource {
    /// Client for `host:port`; nothing is opened until [`PositionSource::connect`]
    pub fn new(address: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            read_timeout,
            reader: None,
            pending: Vec::new(),
        }
    }
}

impl PositionSource for GpsdSource {
    fn connect(&mut self) -> Result<(), PositionError> {
        self.reader = None;
        self.pending.clear();

        let addr = self
            .address
            .to_socket_addrs()
            .map_err(|e| PositionError::Connect(format!("{}: {}", self.address, e)))?
            .next()
            .ok_or_else(|| PositionError::Connect(format!("{}: no address", self.address)))?;

        let mut stream = TcpStream::connect_timeout(&addr, self.read_timeout)
            .map_err(|e| PositionError::Connect(format!("{}: {}", self.address, e)))?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.write_all(WATCH_COMMAND)?;

        info!("Connected to gpsd at {}", self.address);
        self.reader = Some(BufReader::new(stream));
        Ok(())
    }

    fn next_report(&mut self) -> Result<Option<Report>, PositionError> {
        let reader = self.reader.as_mut().ok_or(PositionError::Disconnected)?;

        match reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => {
                self.reader = None;
                Err(PositionError::Disconnected)
            }
            Ok(_) if self.pending.last() != Some(&b'\n') => Ok(None),
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                if line.is_empty() {
                    return Ok(None);
                }
                debug!("gpsd: {}", line);
                parse_report(&line, Instant::now())
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(e) => {
                self.reader = None;
                Err(e.into())
            }
        }
    }

    fn describe(&self) -> String {
        format!("gpsd://{}", self.address)
    }
}
