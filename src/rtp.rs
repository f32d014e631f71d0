//! RTP header parsing for the two wire shapes RAOP uses on the data port:
//! plain audio packets and resend replies (an audio packet wrapped behind
//! a 4-byte resend envelope).

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Size in bytes of a standard (non-extended, no CSRC) RTP header.
pub const HEADER_SIZE: usize = 12;

/// Size in bytes of the resend-reply envelope prepended to a forwarded
/// audio packet.
pub const RESEND_ENVELOPE_SIZE: usize = 4;

/// The payload type byte values RAOP uses on the data and control ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    /// Realtime audio (0x60).
    Audio,
    /// A resend reply wrapping a forwarded audio packet (0x56).
    ResendReply,
    /// A resend request (0x55), only ever sent by us, never received.
    ResendRequest,
    /// Anything else; carries the raw marker+type byte for logging.
    Other(u8),
}

impl PayloadType {
    #[must_use]
    fn from_byte(marker_and_type: u8) -> Self {
        match marker_and_type & 0x7f {
            0x60 => PayloadType::Audio,
            0x56 => PayloadType::ResendReply,
            0x55 => PayloadType::ResendRequest,
            other => PayloadType::Other(other),
        }
    }
}

/// Errors decoding an RTP header.
#[derive(Debug, Error)]
pub enum RtpDecodeError {
    /// Buffer shorter than a minimal RTP header.
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall {
        /// Minimum size required.
        needed: usize,
        /// Size of the buffer that was given.
        have: usize,
    },
    /// The version field was not RTP version 2.
    #[error("unsupported rtp version {0}")]
    InvalidVersion(u8),
}

/// A parsed RTP header plus a reference to the remaining payload bytes.
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader {
    /// RTP protocol version (always 2 for RAOP).
    pub version: u8,
    /// Marker bit, set on the first packet of a stream.
    pub marker: bool,
    /// Payload type classification.
    pub payload_type: PayloadType,
    /// 16-bit sequence number.
    pub sequence: u16,
    /// 32-bit RTP timestamp.
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
}

impl RtpHeader {
    /// Parses a 12-byte RTP header from the front of `buf`. Returns the
    /// header and the byte offset where the payload begins.
    ///
    /// # Errors
    ///
    /// Returns [`RtpDecodeError`] if `buf` is too short or the version
    /// field is not 2.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), RtpDecodeError> {
        if buf.len() < HEADER_SIZE {
            return Err(RtpDecodeError::BufferTooSmall {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }
        let version = buf[0] >> 6;
        if version != 2 {
            return Err(RtpDecodeError::InvalidVersion(version));
        }
        let marker = buf[1] & 0x80 != 0;
        let payload_type = PayloadType::from_byte(buf[1]);
        let sequence = BigEndian::read_u16(&buf[2..4]);
        let timestamp = BigEndian::read_u32(&buf[4..8]);
        let ssrc = BigEndian::read_u32(&buf[8..12]);
        Ok((
            Self {
                version,
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
            },
            HEADER_SIZE,
        ))
    }
}

/// A resend reply: the 4-byte envelope (which repeats the original
/// requested sequence number) followed by a full RTP audio packet.
#[derive(Debug, Clone, Copy)]
pub struct ResendReplyHeader {
    /// Sequence number the original (lost) packet carried, read out of the
    /// envelope rather than the inner RTP header (both should agree).
    pub original_sequence: u16,
}

impl ResendReplyHeader {
    /// Strips the resend envelope from `buf`, returning the envelope header
    /// and the offset where the wrapped RTP packet begins.
    ///
    /// # Errors
    ///
    /// Returns [`RtpDecodeError::BufferTooSmall`] if `buf` is shorter than
    /// the envelope plus a minimal RTP header.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), RtpDecodeError> {
        let needed = RESEND_ENVELOPE_SIZE + HEADER_SIZE;
        if buf.len() < needed {
            return Err(RtpDecodeError::BufferTooSmall {
                needed,
                have: buf.len(),
            });
        }
        let original_sequence = BigEndian::read_u16(&buf[2..4]);
        Ok((Self { original_sequence }, RESEND_ENVELOPE_SIZE))
    }
}
