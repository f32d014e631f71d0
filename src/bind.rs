//! Local UDP port selection for a session's data, control, and timing
//! sockets: start at a base port, bind the data port and the next two
//! ports after it for control and timing, and retry three ports further
//! along on any bind failure.
//!
//! IPv6 is attempted first, falling back to IPv4 only if an IPv6 socket
//! cannot be created at all (not merely if the bind of a particular port
//! fails), using an unambiguous `Result`-based success/failure check (see
//! `DESIGN.md` for the historical bind-polarity pitfall this sidesteps).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use tokio::net::UdpSocket;

/// Default first candidate for the data port.
pub const DEFAULT_BASE_PORT: u16 = 6000;

/// How many times to retry the whole `(data, control, timing)` trio at
/// `port += 3` before giving up.
const MAX_RETRIES: u32 = 20;

/// The three UDP sockets a session needs: audio data, resend-request
/// control, and the (bound-but-unread) RTCP timing channel.
pub struct SessionSockets {
    /// Bound audio data socket.
    pub data: UdpSocket,
    /// Bound control socket (resend requests are sent from here).
    pub control: UdpSocket,
    /// Bound timing socket. RTCP timing packets arriving here are never
    /// read; the socket exists only because the sender expects the port
    /// to be open.
    pub timing: UdpSocket,
    /// The data port that was actually bound; control and timing sit at
    /// `data_port + 1` and `data_port + 2`.
    pub data_port: u16,
}

/// Errors selecting and binding a session's local ports.
#[derive(Debug, Error)]
pub enum BindError {
    /// Every candidate trio starting from `base_port` up to the retry
    /// limit failed to bind on both IPv6 and IPv4.
    #[error("could not bind a data/control/timing port trio starting at {base_port} after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// The first port that was tried.
        base_port: u16,
        /// How many trios were attempted.
        attempts: u32,
        /// The I/O error from the last attempt.
        #[source]
        last: std::io::Error,
    },
}

/// Binds a data/control/timing port trio starting at `base_port`,
/// retrying at `base_port + 3`, `base_port + 6`, ... up to
/// [`MAX_RETRIES`] times. Within one attempt, if any one of the three
/// ports fails to bind, the whole trio is abandoned (any socket that did
/// bind is dropped, releasing the port) before the next attempt.
///
/// Tries an IPv6 wildcard bind first; if IPv6 socket creation itself
/// fails (no IPv6 stack), every subsequent attempt in this call falls
/// back to IPv4 rather than retrying IPv6 each time.
///
/// # Errors
///
/// Returns [`BindError::ExhaustedRetries`] if no trio in the retry budget
/// could be bound.
pub async fn bind_session_ports(base_port: u16) -> Result<SessionSockets, BindError> {
    let mut use_ipv6 = true;
    let mut last_err = None;

    for attempt in 0..MAX_RETRIES {
        let port = base_port.wrapping_add((attempt * 3) as u16);
        match try_bind_trio(port, use_ipv6).await {
            Ok(sockets) => return Ok(sockets),
            Err(TrioBindError::NoIpv6Stack) => {
                use_ipv6 = false;
                match try_bind_trio(port, false).await {
                    Ok(sockets) => return Ok(sockets),
                    Err(TrioBindError::Io(err)) => last_err = Some(err),
                    Err(TrioBindError::NoIpv6Stack) => unreachable!("ipv4 bind cannot report no-ipv6"),
                }
            }
            Err(TrioBindError::Io(err)) => last_err = Some(err),
        }
    }

    Err(BindError::ExhaustedRetries {
        base_port,
        attempts: MAX_RETRIES,
        last: last_err.unwrap_or_else(|| std::io::Error::other("no bind attempts were made")),
    })
}

enum TrioBindError {
    NoIpv6Stack,
    Io(std::io::Error),
}

impl From<std::io::Error> for TrioBindError {
    fn from(err: std::io::Error) -> Self {
        TrioBindError::Io(err)
    }
}

async fn try_bind_trio(port: u16, ipv6: bool) -> Result<SessionSockets, TrioBindError> {
    let data = bind_one(port, ipv6).await?;
    let control = match bind_one(port + 1, ipv6).await {
        Ok(s) => s,
        Err(e) => return Err(e),
    };
    let timing = bind_one(port + 2, ipv6).await?;
    Ok(SessionSockets {
        data,
        control,
        timing,
        data_port: port,
    })
}

async fn bind_one(port: u16, ipv6: bool) -> Result<UdpSocket, TrioBindError> {
    let ip: IpAddr = if ipv6 { Ipv6Addr::UNSPECIFIED.into() } else { Ipv4Addr::UNSPECIFIED.into() };
    let addr = SocketAddr::new(ip, port);
    match UdpSocket::bind(addr).await {
        Ok(socket) => Ok(socket),
        Err(err) if ipv6 && err.kind() == std::io::ErrorKind::AddrNotAvailable => Err(TrioBindError::NoIpv6Stack),
        Err(err) => Err(TrioBindError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_a_contiguous_trio() {
        let sockets = bind_session_ports(0).await.unwrap();
        let data_port = sockets.data.local_addr().unwrap().port();
        let control_port = sockets.control.local_addr().unwrap().port();
        let timing_port = sockets.timing.local_addr().unwrap().port();
        assert_eq!(sockets.data_port, data_port);
        assert_eq!(control_port, data_port + 1);
        assert_eq!(timing_port, data_port + 2);
    }

    #[tokio::test]
    async fn retries_a_busy_base_port() {
        // Occupy the base port's data socket on IPv4, and best-effort on
        // IPv6 too (sandboxes without an IPv6 stack will fail this second
        // bind, which is fine: `bind_session_ports` falls back to IPv4
        // only, where the occupation below still blocks it).
        let held_v4 = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let base = held_v4.local_addr().unwrap().port();
        let _held_v6 = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, base)).await;

        let sockets = bind_session_ports(base).await.unwrap();
        assert_ne!(sockets.data_port, base, "should have retried past the busy port");
    }
}
