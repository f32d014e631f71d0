//! Wire format for retransmission requests sent on the control port.
//!
//! This is not standard RTCP: it is the 8-byte ad-hoc packet a RAOP
//! receiver sends to ask the sender to resend a range of lost audio
//! packets.
//!
//! ```text
//! byte 0      0x80                  (version/padding byte, fixed)
//! byte 1      0x55 | 0x80           (marker bit set, payload type 0x55)
//! bytes 2..4  sequence number of this control packet itself (always 1)
//! bytes 4..6  first missing audio sequence number (big-endian)
//! bytes 6..8  count of missing packets, inclusive (big-endian)
//! ```

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Size in bytes of an encoded resend request.
pub const WIRE_SIZE: usize = 8;

const RESEND_REQUEST_TYPE: u8 = 0x80 | 0x55;

/// A request to resend every audio packet from `first` through
/// `first + count - 1`, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendRequest {
    /// First missing sequence number.
    pub first: u16,
    /// How many consecutive sequence numbers (starting at `first`) are
    /// being requested.
    pub count: u16,
}

impl ResendRequest {
    /// Builds a request covering the inclusive range `[first, last]`.
    #[must_use]
    pub fn for_range(first: u16, last: u16) -> Self {
        let count = last.wrapping_sub(first).wrapping_add(1);
        Self { first, count }
    }

    /// A single-packet last-chance resend request.
    #[must_use]
    pub fn single(seq: u16) -> Self {
        Self { first: seq, count: 1 }
    }

    /// Encodes this request into the 8-byte wire format.
    #[must_use]
    pub fn encode(&self) -> [u8; WIRE_SIZE] {
        let mut buf = [0u8; WIRE_SIZE];
        buf[0] = 0x80;
        buf[1] = RESEND_REQUEST_TYPE;
        BigEndian::write_u16(&mut buf[2..4], 1);
        BigEndian::write_u16(&mut buf[4..6], self.first);
        BigEndian::write_u16(&mut buf[6..8], self.count);
        buf
    }

    /// Decodes an 8-byte resend request, as received by a test harness
    /// standing in for the sender side.
    ///
    /// # Errors
    ///
    /// Returns [`ResendDecodeError`] if `buf` is the wrong length or does
    /// not carry the resend-request payload type.
    pub fn decode(buf: &[u8]) -> Result<Self, ResendDecodeError> {
        if buf.len() != WIRE_SIZE {
            return Err(ResendDecodeError::WrongLength(buf.len()));
        }
        if buf[1] & 0x7f != RESEND_REQUEST_TYPE & 0x7f {
            return Err(ResendDecodeError::WrongPayloadType(buf[1]));
        }
        Ok(Self {
            first: BigEndian::read_u16(&buf[4..6]),
            count: BigEndian::read_u16(&buf[6..8]),
        })
    }
}

/// Errors decoding a resend request.
#[derive(Debug, Error)]
pub enum ResendDecodeError {
    /// Buffer was not exactly [`WIRE_SIZE`] bytes.
    #[error("resend request must be {WIRE_SIZE} bytes, got {0}")]
    WrongLength(usize),
    /// The payload type byte did not indicate a resend request.
    #[error("not a resend request payload type: {0:#x}")]
    WrongPayloadType(u8),
}
