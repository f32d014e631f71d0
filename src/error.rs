//! Crate-wide error types.
//!
//! Each subsystem defines its own narrow error enum; [`EngineError`] only
//! aggregates them at the boundary the session object exposes to callers.

use thiserror::Error;

use crate::crypto::DecryptError;
use crate::decode::DecodeError;
use crate::rtp::RtpDecodeError;
use crate::session::ConfigError;

/// Errors surfaced while a session is being built or is running.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed RTP header.
    #[error("rtp: {0}")]
    Rtp(#[from] RtpDecodeError),

    /// Per-packet AES-CBC decryption failed.
    #[error("decrypt: {0}")]
    Decrypt(#[from] DecryptError),

    /// ALAC (or other codec) decode of an audio packet failed.
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    /// The `fmtp` / session configuration was invalid.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// Socket setup or I/O failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The ingestor task's channel to the consumer was closed.
    #[error("ingestor channel closed")]
    ChannelClosed,
}
