//! The RTP ingestor task: reads audio and resend-reply packets off both
//! the data socket and the control socket (a resend reply comes back to
//! whichever socket the sender chooses to answer on, so both are
//! selected), decrypts and decodes them, and publishes the results into
//! the ring, issuing resend requests on the control socket as gaps
//! appear.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::crypto::PacketDecryptor;
use crate::decode::AlacDecode;
use crate::error::EngineError;
use crate::resend::ResendRequest;
use crate::ring::{Accept, Ring};
use crate::rtp::{PayloadType, ResendReplyHeader, RtpHeader};

/// How long to wait on the data socket before checking for shutdown, the
/// async analogue of a 100ms `select(2)` timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const MAX_PACKET_SIZE: usize = 2048;

/// Drives packet reception for one session.
pub struct Ingestor<D: AlacDecode> {
    data_socket: Arc<UdpSocket>,
    control_socket: Arc<UdpSocket>,
    control_peer: std::net::SocketAddr,
    decryptor: Option<PacketDecryptor>,
    decoder: D,
    ring: Arc<Ring>,
    frame_size: usize,
    channels: usize,
}

impl<D: AlacDecode> Ingestor<D> {
    /// Builds an ingestor. `decryptor` is `None` for an unencrypted (PCM
    /// over `fmtp` negotiation) stream.
    #[must_use]
    pub fn new(
        data_socket: Arc<UdpSocket>,
        control_socket: Arc<UdpSocket>,
        control_peer: std::net::SocketAddr,
        decryptor: Option<PacketDecryptor>,
        decoder: D,
        ring: Arc<Ring>,
        frame_size: usize,
        channels: usize,
    ) -> Self {
        Self {
            data_socket,
            control_socket,
            control_peer,
            decryptor,
            decoder,
            ring,
            frame_size,
            channels,
        }
    }

    /// Runs the receive loop until the ring is closed or the socket errors.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on socket I/O failure, a malformed RTP
    /// header, decryption failure, or a codec error.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let mut data_buf = [0u8; MAX_PACKET_SIZE];
        let mut control_buf = [0u8; MAX_PACKET_SIZE];
        loop {
            tokio::select! {
                recv = self.data_socket.recv_from(&mut data_buf) => {
                    let (len, _peer) = recv?;
                    if let Err(err) = self.handle_packet(&data_buf[..len]).await {
                        tracing::warn!(%err, "dropping unprocessable packet");
                    }
                }
                recv = self.control_socket.recv_from(&mut control_buf) => {
                    let (len, _peer) = recv?;
                    if let Err(err) = self.handle_packet(&control_buf[..len]).await {
                        tracing::warn!(%err, "dropping unprocessable packet");
                    }
                }
                () = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn handle_packet(&mut self, data: &[u8]) -> Result<(), EngineError> {
        if self.ring.is_muted() {
            tracing::debug!("muted, dropping incoming datagram");
            return Ok(());
        }
        let (header, offset) = RtpHeader::decode(data)?;
        match header.payload_type {
            PayloadType::Audio => {
                self.ingest_audio(header.sequence, &data[offset..]).await
            }
            PayloadType::ResendReply => {
                let (_envelope, env_offset) = ResendReplyHeader::decode(data)?;
                let inner = &data[env_offset..];
                let (inner_header, inner_offset) = RtpHeader::decode(inner)?;
                self.ingest_audio(inner_header.sequence, &inner[inner_offset..]).await
            }
            PayloadType::Other(code) => {
                tracing::debug!(code, "ignoring unrecognised data-port payload type");
                Ok(())
            }
            PayloadType::ResendRequest => {
                tracing::debug!("ignoring resend request looped back to us");
                Ok(())
            }
        }
    }

    async fn ingest_audio(&mut self, seq: u16, payload: &[u8]) -> Result<(), EngineError> {
        match self.ring.accept(seq).await {
            Accept::Closed => Err(EngineError::ChannelClosed),
            Accept::Dropped => Ok(()),
            Accept::Slot { index, resend } => {
                let plaintext = match &self.decryptor {
                    Some(decryptor) => decryptor.decrypt(payload),
                    None => payload.to_vec(),
                };
                let samples = self.decoder.decode(&plaintext, self.frame_size, self.channels)?;
                self.ring.publish(index, samples);

                if let Some((first, last)) = resend {
                    self.request_resend(first, last).await?;
                }
                if let Some(missing) = self.ring.after_publish().await {
                    self.request_resend(missing, missing).await?;
                }
                Ok(())
            }
        }
    }

    async fn request_resend(&self, first: u16, last: u16) -> Result<(), EngineError> {
        let request = ResendRequest::for_range(first, last);
        tracing::debug!(first, last, "requesting resend");
        self.control_socket.send_to(&request.encode(), self.control_peer).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::FixedFrameDecoder;
    use byteorder::{BigEndian, ByteOrder};

    fn audio_packet(seq: u16, samples: &[i16]) -> Vec<u8> {
        let mut buf = vec![0x80, 0x60, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2];
        BigEndian::write_u16(&mut buf[2..4], seq);
        for s in samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        buf
    }

    async fn socket_pair() -> (Arc<UdpSocket>, std::net::SocketAddr, Arc<UdpSocket>) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b.local_addr().unwrap();
        (Arc::new(a), b_addr, Arc::new(b))
    }

    #[tokio::test]
    async fn decodes_and_publishes_unencrypted_audio_packet() {
        let (data_sock, _peer, sender) = socket_pair().await;
        let (control_sock, control_peer_addr, control_peer) = socket_pair().await;
        let data_addr = data_sock.local_addr().unwrap();

        let ring = Ring::new(4, 1);
        let ingestor = Ingestor::new(
            data_sock,
            control_sock,
            control_peer_addr,
            None,
            FixedFrameDecoder,
            ring.clone(),
            2,
            2,
        );

        let handle = tokio::spawn(ingestor.run());

        let packet = audio_packet(1, &[1, 2, 3, 4]);
        sender.send_to(&packet, data_addr).await.unwrap();

        // Give the ingestor a moment to process, then confirm the ring saw it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ring.fill().await >= 1);

        drop(control_peer);
        handle.abort();
    }

    #[tokio::test]
    async fn muted_ring_drops_incoming_datagrams() {
        let (data_sock, _peer, sender) = socket_pair().await;
        let (control_sock, control_peer_addr, control_peer) = socket_pair().await;
        let data_addr = data_sock.local_addr().unwrap();

        let ring = Ring::new(4, 1);
        ring.set_muted(true);
        let ingestor = Ingestor::new(
            data_sock,
            control_sock,
            control_peer_addr,
            None,
            FixedFrameDecoder,
            ring.clone(),
            2,
            2,
        );
        let handle = tokio::spawn(ingestor.run());

        sender.send_to(&audio_packet(1, &[1, 2, 3, 4]), data_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ring.fill().await, 0, "muted ingestor must not accept packets into the ring");

        drop(control_peer);
        handle.abort();
    }

    #[tokio::test]
    async fn gap_triggers_outgoing_resend_request() {
        let (data_sock, _peer, sender) = socket_pair().await;
        let (control_sock, control_peer_addr, control_peer) = socket_pair().await;
        let data_addr = data_sock.local_addr().unwrap();

        let ring = Ring::new(4, 1);
        let ingestor = Ingestor::new(
            data_sock,
            control_sock,
            control_peer_addr,
            None,
            FixedFrameDecoder,
            ring.clone(),
            2,
            2,
        );
        let handle = tokio::spawn(ingestor.run());

        sender.send_to(&audio_packet(1, &[0, 0, 0, 0]), data_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.send_to(&audio_packet(5, &[0, 0, 0, 0]), data_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_millis(200), control_peer.recv_from(&mut buf))
            .await
            .expect("expected a resend request")
            .unwrap();
        assert_eq!(len, crate::resend::WIRE_SIZE);
        let request = crate::resend::ResendRequest::decode(&buf[..len]).unwrap();
        assert_eq!(request.first, 2);
        assert_eq!(request.count, 3);

        handle.abort();
    }

    #[tokio::test]
    async fn resend_reply_arriving_on_the_control_socket_fills_the_gap() {
        // A resend reply is sent back to whichever socket the sender
        // chooses to answer on; it must not be lost just because it came
        // in on the control port instead of the data port.
        let (data_sock, _peer, sender) = socket_pair().await;
        let (control_sock, control_peer_addr, control_peer) = socket_pair().await;
        let control_addr = control_sock.local_addr().unwrap();

        let ring = Ring::new(4, 1);
        let ingestor = Ingestor::new(
            data_sock,
            control_sock,
            control_peer_addr,
            None,
            FixedFrameDecoder,
            ring.clone(),
            2,
            2,
        );
        let handle = tokio::spawn(ingestor.run());

        let mut reply = vec![0x80, 0x56, 0, 0];
        reply.extend(audio_packet(7, &[1, 2, 3, 4]));
        sender.send_to(&reply, control_addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ring.fill().await >= 1, "resend reply on the control socket must be accepted");

        drop(control_peer);
        handle.abort();
    }
}
