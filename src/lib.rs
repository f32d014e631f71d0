//! # raop-engine
//!
//! A RAOP (classic AirPlay 1) audio receiver engine: a fixed-size,
//! sequence-addressed jitter ring buffer, AES-128-CBC per-packet
//! decryption, resend-request handling, and a biquad-smoothed playback
//! rate controller driving a sample-stuffing resampler.
//!
//! ALAC decoding itself is out of scope; callers provide an
//! [`decode::AlacDecode`] implementation backed by whatever codec library
//! they link.
//!
//! ## Example
//!
//! ```rust,no_run
//! use raop_engine::session::{AlacSetinfo, SessionConfigBuilder, RaopSession};
//! use raop_engine::decode::FixedFrameDecoder;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), raop_engine::error::EngineError> {
//! let alac = AlacSetinfo::parse_fmtp("352 0 16 40 10 14 2 255 0 0 44100")?;
//! let control_peer = "192.168.1.50:6001".parse().unwrap();
//! let config = SessionConfigBuilder::new(alac, control_peer).build();
//!
//! let data_socket = Arc::new(tokio::net::UdpSocket::bind("0.0.0.0:6000").await?);
//! let control_socket = Arc::new(tokio::net::UdpSocket::bind("0.0.0.0:6001").await?);
//!
//! let mut session = RaopSession::spawn(config, data_socket, control_socket, FixedFrameDecoder)?;
//! let _frame = session.next_frame().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Local data/control/timing UDP port selection.
pub mod bind;
/// Audio frame production: ring pull, rate correction, dithered volume.
pub mod consumer;
/// Per-packet AES-128-CBC decryption.
pub mod crypto;
/// ALAC (or other codec) decode boundary.
pub mod decode;
/// Crate-wide error aggregation.
pub mod error;
/// The RTP receive loop.
pub mod ingestor;
/// Playback rate control.
pub mod rate_controller;
/// Resend (retransmission) request wire format.
pub mod resend;
/// The 512-slot sequence-addressed jitter ring buffer.
pub mod ring;
/// RTP header parsing.
pub mod rtp;
/// Wraparound sequence-number comparison.
pub mod sequence;
/// Session configuration and the top-level session handle.
pub mod session;
/// Dithered fixed-point volume scaling.
pub mod volume;

pub use session::{AlacSetinfo, RaopSession, SessionConfig, SessionConfigBuilder};

pub use error::EngineError;

#[cfg(test)]
mod sequence_tests;
#[cfg(test)]
mod sequence_proptest;
#[cfg(test)]
mod stuffing_proptest;
