//! Minimal NTPv4 client producing (hardware-time, wall-clock) anchor pairs.
//!
//! One 48-byte mode-3 request, one mode-4 response, transmit timestamp at
//! bytes 40-47. The server timestamp is corrected by half the measured round
//! trip before it is paired with the local counter snapshot taken at receive
//! time.

use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::clock::MicrosClock;

/// NTP wire packet size.
pub const NTP_PACKET_SIZE: usize = 48;

/// Seconds between the NTP era (1900) and the Unix epoch (1970).
pub const NTP_UNIX_EPOCH_DIFF: u32 = 2_208_988_800;

/// Replies claiming a time before 2000-01-01 are rejected as bogus.
const MIN_PLAUSIBLE_UNIX_SECS: u64 = 946_684_800;

/// Errors from a sync attempt. All are recoverable; the caller retries at the
/// next resync interval.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("NTP server address could not be resolved")]
    NoServer,
    #[error("failed to open NTP socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to send NTP request: {0}")]
    SendFailed(#[source] io::Error),
    #[error("no NTP response within the timeout")]
    Timeout,
    #[error("malformed NTP response")]
    InvalidResponse,
    #[error("NTP response failed the plausibility check")]
    SanityFailed,
}

/// A matched pair of local hardware time and corrected server wall-clock
/// time, captured at the moment a sync response arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpAnchor {
    /// Server Unix time in microseconds, corrected by RTT/2.
    pub unix_us_at_sync: u64,
    /// Local microsecond counter at response receipt.
    pub hw_us_at_sync: u64,
    /// Measured request/response round trip in microseconds.
    pub rtt_us: u64,
}

/// Anything that can produce a fresh anchor. Implemented by [`NtpClient`]
/// and by test doubles.
pub trait AnchorSource: Send {
    fn obtain_anchor(
        &mut self,
        clock: &dyn MicrosClock,
        timeout: Duration,
    ) -> Result<NtpAnchor, SyncError>;
}

/// Build the 48-byte client request: LI=0, VN=4, Mode=3.
pub fn build_request() -> [u8; NTP_PACKET_SIZE] {
    let mut packet = [0u8; NTP_PACKET_SIZE];
    packet[0] = 0x23;
    packet
}

/// Convert 32-bit NTP fractional seconds to microseconds.
pub fn frac_to_micros(frac: u32) -> u64 {
    (frac as u64 * 1_000_000) >> 32
}

/// Validate a response and extract the server transmit time as Unix
/// microseconds.
pub fn parse_response(buf: &[u8]) -> Result<u64, SyncError> {
    if buf.len() != NTP_PACKET_SIZE {
        return Err(SyncError::InvalidResponse);
    }
    let mode = buf[0] & 0x07;
    if mode != 4 {
        return Err(SyncError::InvalidResponse);
    }

    // Transmit timestamp: seconds since 1900 and a 32-bit fraction, both
    // big-endian, at bytes 40-47.
    let secs = u32::from_be_bytes([buf[40], buf[41], buf[42], buf[43]]);
    let frac = u32::from_be_bytes([buf[44], buf[45], buf[46], buf[47]]);

    let unix_secs = secs.wrapping_sub(NTP_UNIX_EPOCH_DIFF) as u64;
    if secs < NTP_UNIX_EPOCH_DIFF || unix_secs < MIN_PLAUSIBLE_UNIX_SECS {
        return Err(SyncError::SanityFailed);
    }

    Ok(unix_secs * 1_000_000 + frac_to_micros(frac))
}

/// UDP client bound to a fixed local port, talking to one configured server.
pub struct NtpClient {
    socket: UdpSocket,
    server: SocketAddr,
}

impl NtpClient {
    /// Resolve the server (dotted quad directly, otherwise a DNS lookup via
    /// the system resolver) and bind the local client port.
    pub fn new(server: &str, server_port: u16, local_port: u16) -> Result<Self, SyncError> {
        let server = resolve_server(server, server_port)?;
        let socket =
            UdpSocket::bind(("0.0.0.0", local_port)).map_err(SyncError::Socket)?;
        debug!(%server, local_port, "NTP client ready");
        Ok(Self { socket, server })
    }

    /// Server endpoint in use.
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// One full sync exchange. On success the returned anchor pairs the
    /// RTT/2-corrected server time with the local counter at receive time.
    pub fn sync(
        &self,
        clock: &dyn MicrosClock,
        timeout: Duration,
    ) -> Result<NtpAnchor, SyncError> {
        self.flush_stale();

        let request = build_request();
        let hw_send = clock.now_us();
        self.socket
            .send_to(&request, self.server)
            .map_err(SyncError::SendFailed)?;

        let mut buf = [0u8; 128];
        let len = self.await_response(&mut buf, timeout)?;
        let hw_recv = clock.now_us();

        let server_unix_us = parse_response(&buf[..len])?;
        let rtt_us = hw_recv - hw_send;

        let anchor = NtpAnchor {
            unix_us_at_sync: server_unix_us + rtt_us / 2,
            hw_us_at_sync: hw_recv,
            rtt_us,
        };
        debug!(rtt_us, unix_us = anchor.unix_us_at_sync, "NTP sync complete");
        Ok(anchor)
    }

    /// Drop any datagrams left over from an earlier timed-out exchange so the
    /// next reply we read answers the request we are about to send.
    fn flush_stale(&self) {
        if self.socket.set_nonblocking(true).is_err() {
            return;
        }
        let mut dump = [0u8; 128];
        let mut flushed = 0u32;
        while self.socket.recv_from(&mut dump).is_ok() {
            flushed += 1;
        }
        if flushed > 0 {
            warn!(flushed, "discarded stale NTP datagrams");
        }
        let _ = self.socket.set_nonblocking(false);
    }

    /// Wait for a datagram from the configured server, ignoring strays.
    fn await_response(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, SyncError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(std::time::Instant::now())
                .ok_or(SyncError::Timeout)?;
            if remaining.is_zero() {
                return Err(SyncError::Timeout);
            }
            self.socket
                .set_read_timeout(Some(remaining))
                .map_err(SyncError::Socket)?;
            match self.socket.recv_from(buf) {
                Ok((len, from)) => {
                    if from.ip() == self.server.ip() {
                        return Ok(len);
                    }
                    debug!(%from, "ignoring datagram from unexpected source");
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(SyncError::Timeout);
                }
                Err(e) => return Err(SyncError::Socket(e)),
            }
        }
    }
}

impl AnchorSource for NtpClient {
    fn obtain_anchor(
        &mut self,
        clock: &dyn MicrosClock,
        timeout: Duration,
    ) -> Result<NtpAnchor, SyncError> {
        self.sync(clock, timeout)
    }
}

fn resolve_server(server: &str, port: u16) -> Result<SocketAddr, SyncError> {
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (server, port)
        .to_socket_addrs()
        .map_err(|_| SyncError::NoServer)?
        .find(|a| a.is_ipv4())
        .ok_or(SyncError::NoServer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::clock::ChainedMicros;

    fn response(secs: u32, frac: u32) -> [u8; NTP_PACKET_SIZE] {
        let mut buf = [0u8; NTP_PACKET_SIZE];
        buf[0] = 0x24; // LI=0, VN=4, Mode=4
        buf[1] = 2; // stratum
        buf[40..44].copy_from_slice(&secs.to_be_bytes());
        buf[44..48].copy_from_slice(&frac.to_be_bytes());
        buf
    }

    #[test]
    fn test_request_is_mode_3() {
        let req = build_request();
        assert_eq!(req.len(), NTP_PACKET_SIZE);
        assert_eq!(req[0], 0x23);
        assert!(req[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_known_timestamp() {
        // 2025-01-01 00:00:00 UTC plus half a second.
        let ntp_secs = 1_735_689_600u32.wrapping_add(NTP_UNIX_EPOCH_DIFF);
        let buf = response(ntp_secs, 0x8000_0000);
        assert_eq!(parse_response(&buf).unwrap(), 1_735_689_600_500_000);
    }

    #[test]
    fn test_frac_conversion_edges() {
        assert_eq!(frac_to_micros(0), 0);
        assert_eq!(frac_to_micros(0x8000_0000), 500_000);
        // The largest fraction still maps below one full second.
        assert!(frac_to_micros(u32::MAX) < 1_000_000);
    }

    #[test]
    fn test_parse_rejects_wrong_size() {
        let buf = [0u8; 40];
        assert!(matches!(
            parse_response(&buf),
            Err(SyncError::InvalidResponse)
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_mode() {
        let mut buf = response(1_735_689_600u32.wrapping_add(NTP_UNIX_EPOCH_DIFF), 0);
        buf[0] = 0x23; // client mode, not server
        assert!(matches!(
            parse_response(&buf),
            Err(SyncError::InvalidResponse)
        ));
    }

    #[test]
    fn test_parse_rejects_pre_2000_times() {
        // 1999-01-01 is before the plausibility floor.
        let buf = response(915_148_800u32.wrapping_add(NTP_UNIX_EPOCH_DIFF), 0);
        assert!(matches!(parse_response(&buf), Err(SyncError::SanityFailed)));
    }

    #[test]
    fn test_unresolvable_server() {
        let err = NtpClient::new("no-such-host.invalid", 123, 0).err().unwrap();
        assert!(matches!(err, SyncError::NoServer));
    }

    #[test]
    fn test_sync_against_loopback_server() {
        // A one-shot NTP server on an ephemeral loopback port.
        let server_sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server_sock.local_addr().unwrap();
        let server_unix_secs: u32 = 1_735_689_600;

        let server = std::thread::spawn(move || {
            let mut buf = [0u8; 128];
            let (len, from) = server_sock.recv_from(&mut buf).unwrap();
            assert_eq!(len, NTP_PACKET_SIZE);
            assert_eq!(buf[0] & 0x07, 3);
            let reply = response(
                server_unix_secs.wrapping_add(NTP_UNIX_EPOCH_DIFF),
                0x4000_0000,
            );
            server_sock.send_to(&reply, from).unwrap();
        });

        let client = NtpClient::new("127.0.0.1", server_addr.port(), 0).unwrap();
        let clock = ChainedMicros::starting_at(5_000_000);
        let anchor = client
            .sync(&clock, Duration::from_millis(2000))
            .expect("loopback sync");
        server.join().unwrap();

        let server_us = server_unix_secs as u64 * 1_000_000 + 250_000;
        // RTT on loopback with a virtual clock is zero, so the corrected
        // time equals the server transmit time.
        assert_eq!(anchor.unix_us_at_sync, server_us + anchor.rtt_us / 2);
        assert_eq!(anchor.hw_us_at_sync, 5_000_000);
    }

    #[test]
    fn test_sync_timeout_when_server_silent() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let client = NtpClient::new("127.0.0.1", port, 0).unwrap();
        let clock = ChainedMicros::new();
        let err = client
            .sync(&clock, Duration::from_millis(50))
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Timeout));
    }
}
