//! Codec boundary: turning a decrypted RTP payload into interleaved PCM.
//!
//! ALAC decoding itself is out of scope for this crate (see the
//! `alac_setinfo` design note); callers supply an implementation of
//! [`AlacDecode`], typically backed by a real ALAC decoder library. A
//! [`FixedFrameDecoder`] test double is provided for exercising the ring
//! buffer and rate controller without linking a real codec.

use thiserror::Error;

/// Errors a codec implementation can report.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was truncated or otherwise not a valid frame for the
    /// negotiated `fmtp` parameters.
    #[error("malformed audio frame: {0}")]
    Malformed(String),
    /// The codec produced a frame of the wrong sample count.
    #[error("expected {expected} samples per channel, decoder produced {got}")]
    WrongFrameLength {
        /// Samples per channel the session expects (`frame_size`).
        expected: usize,
        /// Samples per channel the decoder actually produced.
        got: usize,
    },
}

/// Decodes one RTP audio payload (already decrypted) into interleaved
/// 16-bit PCM samples, `channels * frame_size` of them.
pub trait AlacDecode: Send {
    /// Decodes a single packet's payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload cannot be decoded, or decodes
    /// to something other than the configured frame size.
    fn decode(&mut self, payload: &[u8], frame_size: usize, channels: usize) -> Result<Vec<i16>, DecodeError>;
}

/// A decoder that expects payloads already encoded as raw little-endian
/// interleaved `i16` PCM and performs no transformation beyond byte
/// reinterpretation and length validation.
///
/// Useful for tests and for a `fmtp`-negotiated PCM pass-through path; a
/// real ALAC stream must supply its own [`AlacDecode`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedFrameDecoder;

impl AlacDecode for FixedFrameDecoder {
    fn decode(&mut self, payload: &[u8], frame_size: usize, channels: usize) -> Result<Vec<i16>, DecodeError> {
        let expected_bytes = frame_size * channels * 2;
        if payload.len() != expected_bytes {
            return Err(DecodeError::Malformed(format!(
                "payload is {} bytes, expected {expected_bytes}",
                payload.len()
            )));
        }
        let samples = payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect::<Vec<_>>();
        if samples.len() != frame_size * channels {
            return Err(DecodeError::WrongFrameLength {
                expected: frame_size * channels,
                got: samples.len(),
            });
        }
        Ok(samples)
    }
}
