//! SocketCAN raw socket source (Linux)
//!
//! Opens a `CAN_RAW` socket bound to one interface. The socket is only ever
//! read from.

use crate::error::ProtocolError;
use crate::frame::{BusFrame, MAX_PAYLOAD};
use crate::source::FrameSource;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const AF_CAN: libc::c_int = 29;
const CAN_RAW: libc::c_int = 1;
const SOL_CAN_RAW: libc::c_int = 101;
const CAN_RAW_FILTER: libc::c_int = 1;

const CAN_EFF_FLAG: u32 = 0x8000_0000;
const CAN_RTR_FLAG: u32 = 0x4000_0000;
const CAN_ERR_FLAG: u32 = 0x2000_0000;
const CAN_SFF_MASK: u32 = 0x0000_07FF;
const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Kernel `struct can_frame`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct RawCanFrame {
    can_id: u32,
    len: u8,
    _pad: u8,
    _res0: u8,
    _len8_dlc: u8,
    data: [u8; MAX_PAYLOAD],
}

/// Kernel `struct sockaddr_can`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct RawSockaddrCan {
    can_family: libc::sa_family_t,
    can_ifindex: libc::c_int,
    can_addr: [u64; 2],
}

/// Kernel `struct can_filter`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RawCanFilter {
    can_id: u32,
    can_mask: u32,
}

/// Raw CAN socket bound to one interface
pub struct SocketCanSource {
    fd: OwnedFd,
    interface: String,
    channel: u8,
    timeout: Option<Duration>,
}

impl SocketCanSource {
    /// Open and bind a raw socket on `interface` (e.g. `can0`)
    pub fn open(interface: &str, channel: u8) -> Result<Self, ProtocolError> {
        let name = CString::new(interface).map_err(|e| ProtocolError::Open(e.to_string()))?;

        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            return Err(ProtocolError::Open(format!(
                "{}: {}",
                interface,
                io::Error::last_os_error()
            )));
        }

        let raw = unsafe { libc::socket(AF_CAN, libc::SOCK_RAW | libc::SOCK_CLOEXEC, CAN_RAW) };
        if raw < 0 {
            return Err(ProtocolError::Open(format!(
                "socket: {}",
                io::Error::last_os_error()
            )));
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nothing else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let addr = RawSockaddrCan {
            can_family: AF_CAN as libc::sa_family_t,
            can_ifindex: ifindex as libc::c_int,
            can_addr: [0; 2],
        };
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const RawSockaddrCan as *const libc::sockaddr,
                std::mem::size_of::<RawSockaddrCan>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(ProtocolError::Open(format!(
                "bind {}: {}",
                interface,
                io::Error::last_os_error()
            )));
        }

        info!("Opened SocketCAN interface {} as channel {}", interface, channel);

        Ok(Self {
            fd,
            interface: interface.to_string(),
            channel,
            timeout: None,
        })
    }

    /// Restrict reception to the given standard identifiers
    pub fn set_filters(&self, ids: &[u32]) -> Result<(), ProtocolError> {
        let filters: Vec<RawCanFilter> = ids
            .iter()
            .map(|&id| RawCanFilter {
                can_id: id,
                can_mask: CAN_SFF_MASK | CAN_EFF_FLAG | CAN_RTR_FLAG,
            })
            .collect();

        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_CAN_RAW,
                CAN_RAW_FILTER,
                filters.as_ptr() as *const libc::c_void,
                (filters.len() * std::mem::size_of::<RawCanFilter>()) as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        debug!("Installed {} receive filters on {}", ids.len(), self.interface);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        if self.timeout == Some(timeout) {
            return Ok(());
        }

        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        self.timeout = Some(timeout);
        Ok(())
    }
}

impl FrameSource for SocketCanSource {
    fn recv(&mut self, timeout: Duration) -> Result<Option<BusFrame>, ProtocolError> {
        self.set_timeout(timeout)?;

        let mut raw = RawCanFrame::default();
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut raw as *mut RawCanFrame as *mut libc::c_void,
                std::mem::size_of::<RawCanFrame>(),
            )
        };
        let timestamp = Instant::now();

        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                    Ok(None)
                }
                _ => Err(err.into()),
            };
        }
        if (n as usize) < std::mem::size_of::<RawCanFrame>() {
            return Err(ProtocolError::Malformed(format!("short read of {} bytes", n)));
        }

        // Error and remote-request frames carry no signal data.
        if raw.can_id & (CAN_ERR_FLAG | CAN_RTR_FLAG) != 0 {
            return Ok(None);
        }

        let len = (raw.len as usize).min(MAX_PAYLOAD);
        let frame = if raw.can_id & CAN_EFF_FLAG != 0 {
            BusFrame::new_extended(raw.can_id & CAN_EFF_MASK, &raw.data[..len], self.channel, timestamp)?
        } else {
            BusFrame::new(raw.can_id & CAN_SFF_MASK, &raw.data[..len], self.channel, timestamp)?
        };
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        format!("socketcan:{}", self.interface)
    }
}
