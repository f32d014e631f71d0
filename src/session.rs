//! Session configuration and the top-level handle tying the ingestor,
//! ring, and consumer together for one RAOP stream.
//!
//! Session parameters (the AES key/IV, the `fmtp` setinfo fields, the
//! control-port peer address) are bundled into one immutable
//! [`SessionConfig`], built once per stream via [`SessionConfigBuilder`]
//! instead of living as process-wide statics set by RTSP handlers
//! elsewhere in the process.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::consumer::{ConsumedFrame, Consumer};
use crate::crypto::PacketDecryptor;
use crate::decode::AlacDecode;
use crate::error::EngineError;
use crate::ring::Ring;
use crate::ingestor::Ingestor;

/// Errors building a [`SessionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The `a=fmtp` string did not have the expected 11 whitespace-
    /// separated decimal fields.
    #[error("malformed fmtp string: {0:?}")]
    MalformedFmtp(String),
    /// The AES key or IV supplied was not 16 bytes.
    #[error("aes key/iv must be 16 bytes, got {0}")]
    BadKeyLength(usize),
    /// The `fmtp` bit depth was not 16; only 16-bit PCM is supported.
    #[error("unsupported sample size: {0} bits, only 16-bit samples are supported")]
    UnsupportedSampleSize(u8),
}

/// The decoded ALAC `setinfo` fields carried in the SDP `a=fmtp` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlacSetinfo {
    /// Samples per channel per packet.
    pub frame_size: u32,
    /// ALAC magic cookie compatible-version byte.
    pub compatible_version: u8,
    /// Bit depth of the original PCM.
    pub bit_depth: u8,
    /// ALAC `pb` tuning parameter.
    pub pb: u8,
    /// ALAC `mb` tuning parameter.
    pub mb: u8,
    /// ALAC `kb` tuning parameter.
    pub kb: u8,
    /// Channel count.
    pub channels: u8,
    /// Maximum run length.
    pub max_run: u16,
    /// Maximum frame size in bytes.
    pub max_frame_bytes: u32,
    /// Average bit rate.
    pub avg_bit_rate: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AlacSetinfo {
    /// Parses an `a=fmtp` value's 11 whitespace-separated decimal fields
    /// (frame_size, compatible_version, bit_depth, pb, mb, kb, channels,
    /// max_run, max_frame_bytes, avg_bit_rate, sample_rate). Any leading
    /// RTP payload-type token must be stripped by the caller first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedFmtp`] if there are not exactly 11
    /// fields or any field is not a valid non-negative integer.
    pub fn parse_fmtp(fmtp: &str) -> Result<Self, ConfigError> {
        let fields: Vec<u64> = fmtp
            .split_whitespace()
            .map(|f| f.parse::<u64>().map_err(|_| ConfigError::MalformedFmtp(fmtp.to_string())))
            .collect::<Result<_, _>>()?;
        if fields.len() != 11 {
            return Err(ConfigError::MalformedFmtp(fmtp.to_string()));
        }
        Ok(Self {
            frame_size: fields[0] as u32,
            compatible_version: fields[1] as u8,
            bit_depth: fields[2] as u8,
            pb: fields[3] as u8,
            mb: fields[4] as u8,
            kb: fields[5] as u8,
            channels: fields[6] as u8,
            max_run: fields[7] as u16,
            max_frame_bytes: fields[8] as u32,
            avg_bit_rate: fields[9] as u32,
            sample_rate: fields[10] as u32,
        })
    }
}

/// Immutable, fully-resolved configuration for one RAOP session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// ALAC stream parameters negotiated via SDP.
    pub alac: AlacSetinfo,
    /// Session AES-128 key, or `None` for an unencrypted stream.
    pub aes_key: Option<[u8; 16]>,
    /// Session AES-128 IV, required iff `aes_key` is set.
    pub aes_iv: Option<[u8; 16]>,
    /// Where to send resend requests.
    pub control_peer: SocketAddr,
    /// Initial output gain in decibels.
    pub initial_volume_db: f64,
    /// Fill level (in frames) the ring must reach before playback starts
    /// or resumes after an underrun. This is the ring's own `START_FILL`
    /// threshold, not the rate controller's own (separately learned)
    /// `desired_fill` setpoint — see [`crate::rate_controller::RateController`].
    pub start_fill: i16,
}

/// Builder for [`SessionConfig`], using a consuming builder-method style.
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    alac: AlacSetinfo,
    aes_key: Option<[u8; 16]>,
    aes_iv: Option<[u8; 16]>,
    control_peer: SocketAddr,
    initial_volume_db: f64,
    start_fill: i16,
}

impl SessionConfigBuilder {
    /// Starts a builder for an unencrypted stream with default volume and
    /// buffering targets; chain [`SessionConfigBuilder::encrypted`] to add
    /// a key, and other setters to override the defaults.
    #[must_use]
    pub fn new(alac: AlacSetinfo, control_peer: SocketAddr) -> Self {
        Self {
            alac,
            aes_key: None,
            aes_iv: None,
            control_peer,
            initial_volume_db: 0.0,
            start_fill: crate::ring::START_FILL as i16,
        }
    }

    /// Sets the session AES key and IV.
    #[must_use]
    pub fn encrypted(mut self, key: [u8; 16], iv: [u8; 16]) -> Self {
        self.aes_key = Some(key);
        self.aes_iv = Some(iv);
        self
    }

    /// Overrides the initial output gain.
    #[must_use]
    pub fn initial_volume_db(mut self, db: f64) -> Self {
        self.initial_volume_db = db;
        self
    }

    /// Overrides the ring's buffering-completion threshold (default
    /// [`crate::ring::START_FILL`]).
    #[must_use]
    pub fn start_fill(mut self, frames: i16) -> Self {
        self.start_fill = frames;
        self
    }

    /// Finishes building the configuration.
    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            alac: self.alac,
            aes_key: self.aes_key,
            aes_iv: self.aes_iv,
            control_peer: self.control_peer,
            initial_volume_db: self.initial_volume_db,
            start_fill: self.start_fill,
        }
    }
}

/// A running RAOP session: owns the ring, the background ingestor task,
/// and the consumer that callers pull decoded, rate-corrected, volume-
/// scaled frames from.
pub struct RaopSession {
    ring: Arc<Ring>,
    consumer: Consumer,
    rng: StdRng,
    ingestor_task: JoinHandle<Result<(), EngineError>>,
    /// Held only to keep the port open for the session's lifetime; RTCP
    /// timing packets arriving here are never read (see `DESIGN.md`,
    /// "Timing channel unused"). `None` when the caller supplied its own
    /// sockets via [`RaopSession::spawn`] instead of
    /// [`RaopSession::bind_and_spawn`].
    _timing_socket: Option<Arc<UdpSocket>>,
}

impl RaopSession {
    /// Builds the ring and consumer, then spawns the ingestor task reading
    /// from `data_socket` and sending resend requests via `control_socket`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if an AES key/IV was supplied but
    /// not 16 bytes, or if `config.alac.bit_depth` is not 16 (the only
    /// sample size this engine supports), or [`EngineError::Decrypt`] for
    /// any other decryptor setup failure.
    pub fn spawn<D: AlacDecode + 'static>(
        config: SessionConfig,
        data_socket: Arc<UdpSocket>,
        control_socket: Arc<UdpSocket>,
        decoder: D,
    ) -> Result<Self, EngineError> {
        Self::spawn_with_timing(config, data_socket, control_socket, None, decoder)
    }

    /// Selects and binds a fresh data/control/timing port trio starting at
    /// `base_port` (see [`crate::bind::bind_session_ports`]), then spawns
    /// the session exactly as [`RaopSession::spawn`] does. This is the
    /// entry point that matches the external-interface port-selection rule
    /// in full; `spawn` remains available for callers (and RTSP handlers)
    /// that already negotiated and bound their own sockets.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if no port trio in the retry budget
    /// could be bound, or any error [`RaopSession::spawn`] can return.
    pub async fn bind_and_spawn<D: AlacDecode + 'static>(
        config: SessionConfig,
        base_port: u16,
        decoder: D,
    ) -> Result<(Self, u16), EngineError> {
        let sockets = crate::bind::bind_session_ports(base_port)
            .await
            .map_err(|err| EngineError::Io(std::io::Error::other(err)))?;
        let data_port = sockets.data_port;
        let session = Self::spawn_with_timing(
            config,
            Arc::new(sockets.data),
            Arc::new(sockets.control),
            Some(Arc::new(sockets.timing)),
            decoder,
        )?;
        Ok((session, data_port))
    }

    fn spawn_with_timing<D: AlacDecode + 'static>(
        config: SessionConfig,
        data_socket: Arc<UdpSocket>,
        control_socket: Arc<UdpSocket>,
        timing_socket: Option<Arc<UdpSocket>>,
        decoder: D,
    ) -> Result<Self, EngineError> {
        if config.alac.bit_depth != 16 {
            return Err(ConfigError::UnsupportedSampleSize(config.alac.bit_depth).into());
        }

        let frame_size = config.alac.frame_size as usize;
        let channels = config.alac.channels as usize;
        let ring = Ring::new(frame_size * channels, config.start_fill);

        let decryptor = match (config.aes_key, config.aes_iv) {
            (Some(key), Some(iv)) => Some(PacketDecryptor::new(&key, &iv)?),
            _ => None,
        };

        let ingestor = Ingestor::new(
            data_socket,
            control_socket,
            config.control_peer,
            decryptor,
            decoder,
            ring.clone(),
            frame_size,
            channels,
        );
        let ingestor_task = tokio::spawn(ingestor.run());

        let consumer = Consumer::new(ring.clone(), channels, frame_size, config.initial_volume_db);

        Ok(Self {
            ring,
            consumer,
            rng: StdRng::from_entropy(),
            ingestor_task,
            _timing_socket: timing_socket,
        })
    }

    /// Pulls the next rate-corrected, volume-scaled PCM frame.
    pub async fn next_frame(&mut self) -> ConsumedFrame {
        self.consumer.next_frame(&mut self.rng).await
    }

    /// Sets output gain in decibels.
    pub fn set_volume_db(&mut self, db: f64) {
        self.consumer.set_volume_db(db);
    }

    /// Mutes the session: the ingestor starts silently dropping incoming
    /// datagrams (a "global mute" gate on the receive path) and
    /// already-buffered output is scaled to silence immediately,
    /// rather than waiting for the ring to drain on its own.
    pub fn mute(&mut self) {
        self.ring.set_muted(true);
        self.consumer.mute();
    }

    /// Clears a previous [`RaopSession::mute`]: the ingestor resumes
    /// accepting packets and output returns to the configured volume.
    pub fn unmute(&mut self) {
        self.ring.set_muted(false);
        self.consumer.unmute();
    }

    /// Discards all buffered audio, e.g. on a client-initiated flush.
    pub async fn flush(&self) {
        self.ring.flush().await;
    }

    /// Current ring occupancy, for metrics/diagnostics.
    pub async fn buffer_fill(&self) -> i16 {
        self.ring.fill().await
    }

    /// Shuts the session down: closes the ring (waking any blocked reader)
    /// and aborts the ingestor task.
    pub fn close(&self) {
        self.ring.close();
        self.ingestor_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_fmtp() {
        let fmtp = "352 0 16 40 10 14 2 255 0 0 44100";
        let parsed = AlacSetinfo::parse_fmtp(fmtp).unwrap();
        assert_eq!(parsed.frame_size, 352);
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.sample_rate, 44100);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = AlacSetinfo::parse_fmtp("1 2 3").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedFmtp(_)));
    }

    #[test]
    fn rejects_non_numeric_field() {
        let fmtp = "352 0 16 40 10 14 2 255 0 0 fourtyfour";
        let err = AlacSetinfo::parse_fmtp(fmtp).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedFmtp(_)));
    }

    #[test]
    fn builder_defaults_to_unencrypted() {
        let alac = AlacSetinfo::parse_fmtp("352 0 16 40 10 14 2 255 0 0 44100").unwrap();
        let addr: SocketAddr = "127.0.0.1:6001".parse().unwrap();
        let config = SessionConfigBuilder::new(alac, addr).build();
        assert!(config.aes_key.is_none());
        assert!((config.initial_volume_db - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn builder_carries_encryption_keys_through() {
        let alac = AlacSetinfo::parse_fmtp("352 0 16 40 10 14 2 255 0 0 44100").unwrap();
        let addr: SocketAddr = "127.0.0.1:6001".parse().unwrap();
        let config = SessionConfigBuilder::new(alac, addr)
            .encrypted([1u8; 16], [2u8; 16])
            .initial_volume_db(-12.0)
            .start_fill(200)
            .build();
        assert_eq!(config.aes_key, Some([1u8; 16]));
        assert_eq!(config.start_fill, 200);
    }

    #[tokio::test]
    async fn spawn_rejects_a_bit_depth_other_than_sixteen() {
        // frame_size compatible_version bit_depth=24 pb mb kb channels max_run max_frame_bytes avg_bit_rate sample_rate
        let alac = AlacSetinfo::parse_fmtp("352 0 24 40 10 14 2 255 0 0 44100").unwrap();
        let addr: SocketAddr = "127.0.0.1:6001".parse().unwrap();
        let config = SessionConfigBuilder::new(alac, addr).build();

        let data_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let control_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let err = RaopSession::spawn(config, data_socket, control_socket, crate::decode::FixedFrameDecoder)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::UnsupportedSampleSize(24))
        ));
    }
}
