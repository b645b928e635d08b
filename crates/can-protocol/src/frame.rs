//! Bus Frame Model

use crate::error::ProtocolError;
use crate::id;
use std::fmt;
use std::time::Instant;

/// Maximum payload of a classic CAN frame
pub const MAX_PAYLOAD: usize = 8;

/// A single frame received from a bus channel.
///
/// Frames are immutable once built: the source creates one per received
/// datagram, the decoder consumes it once and drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    /// Arbitration identifier (11 or 29 bits)
    id: u32,
    /// Whether the frame used the 29-bit identifier format
    extended: bool,
    /// Payload storage, only the first `len` bytes are meaningful
    data: [u8; MAX_PAYLOAD],
    /// Number of payload bytes
    len: u8,
    /// Channel the frame arrived on
    channel: u8,
    /// Monotonic arrival time
    timestamp: Instant,
}

impl BusFrame {
    /// Build a frame, choosing the identifier format from its width
    pub fn new(
        id: u32,
        payload: &[u8],
        channel: u8,
        timestamp: Instant,
    ) -> Result<Self, ProtocolError> {
        Self::build(id, id > id::STANDARD_MAX, payload, channel, timestamp)
    }

    /// Build a frame that used the 29-bit identifier format on the wire
    pub fn new_extended(
        id: u32,
        payload: &[u8],
        channel: u8,
        timestamp: Instant,
    ) -> Result<Self, ProtocolError> {
        Self::build(id, true, payload, channel, timestamp)
    }

    fn build(
        id: u32,
        extended: bool,
        payload: &[u8],
        channel: u8,
        timestamp: Instant,
    ) -> Result<Self, ProtocolError> {
        if id > id::EXTENDED_MAX {
            return Err(ProtocolError::InvalidIdentifier(id));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLong(payload.len()));
        }

        let mut data = [0u8; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            id,
            extended,
            data,
            len: payload.len() as u8,
            channel,
            timestamp,
        })
    }

    /// Arbitration identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the identifier is in the 29-bit format
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the frame carries no payload
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Channel the frame arrived on
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Monotonic arrival time
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

impl fmt::Display for BusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "ID: 0x{:08X} [{}]", self.id, self.len)?;
        } else {
            write!(f, "ID: 0x{:03X} [{}]", self.id, self.len)?;
        }
        for byte in self.payload() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_standard_frame() {
        let now = Instant::now();
        let frame = BusFrame::new(0x3D1, &[0xCC, 0x00, 0xC8], 0, now).unwrap();
        assert_eq!(frame.id(), 0x3D1);
        assert!(!frame.is_extended());
        assert_eq!(frame.payload(), &[0xCC, 0x00, 0xC8]);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.timestamp(), now);
    }

    #[test]
    fn test_wide_identifier_is_extended() {
        let frame = BusFrame::new(0x18FEF100, &[], 1, Instant::now()).unwrap();
        assert!(frame.is_extended());
        assert!(frame.is_empty());
        assert_eq!(frame.channel(), 1);
    }

    #[test]
    fn test_rejects_30_bit_identifier() {
        let result = BusFrame::new(0x2000_0000, &[0x01], 0, Instant::now());
        assert!(matches!(result, Err(ProtocolError::InvalidIdentifier(0x2000_0000))));
    }

    #[test]
    fn test_rejects_long_payload() {
        let result = BusFrame::new(0x100, &[0u8; 9], 0, Instant::now());
        assert!(matches!(result, Err(ProtocolError::PayloadTooLong(9))));
    }

    #[test]
    fn test_display_format() {
        let frame = BusFrame::new(0x0C9, &[0x1A, 0x2B], 0, Instant::now()).unwrap();
        assert_eq!(frame.to_string(), "ID: 0x0C9 [2] 1A 2B");
    }

    proptest! {
        #[test]
        fn prop_payload_preserved(id in 0u32..=0x1FFF_FFFF, payload in proptest::collection::vec(any::<u8>(), 0..=8)) {
            let frame = BusFrame::new(id, &payload, 0, Instant::now()).unwrap();
            prop_assert_eq!(frame.payload(), payload.as_slice());
            prop_assert_eq!(frame.id(), id);
        }
    }
}
