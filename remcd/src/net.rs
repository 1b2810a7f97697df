//! UDP wiring: multicast telemetry out, multicast commands in, NTP client.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use anyhow::{Context, Result};
use tracing::info;

use remc_core::command::{Command, CommandSource};
use remc_core::config::NetworkConfig;
use remc_core::io::DatagramSink;
use remc_core::timebase::ntp::NtpClient;

/// Telemetry publisher: one socket, every datagram to the multicast group.
pub struct MulticastSink {
    socket: UdpSocket,
    destination: SocketAddrV4,
}

impl MulticastSink {
    pub fn open(cfg: &NetworkConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .context("failed to bind telemetry socket")?;
        socket
            .set_multicast_ttl_v4(2)
            .context("failed to set telemetry multicast TTL")?;
        let destination = SocketAddrV4::new(cfg.telemetry_group, cfg.telemetry_port);
        info!(%destination, "telemetry multicast ready");
        Ok(Self {
            socket,
            destination,
        })
    }
}

impl DatagramSink for MulticastSink {
    fn send(&mut self, datagram: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(datagram, self.destination).map(|_| ())
    }
}

/// Command listener joined to the command multicast group, polled
/// nonblocking from the supervisor loop.
pub struct CommandSocket {
    socket: UdpSocket,
    buf: [u8; 256],
}

impl CommandSocket {
    pub fn open(cfg: &NetworkConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, cfg.command_port))
            .with_context(|| format!("failed to bind command port {}", cfg.command_port))?;
        if socket
            .join_multicast_v4(&cfg.command_group, &cfg.local_ip)
            .is_err()
        {
            // The configured interface address may not exist off-target;
            // fall back to the default interface.
            socket
                .join_multicast_v4(&cfg.command_group, &Ipv4Addr::UNSPECIFIED)
                .with_context(|| format!("failed to join command group {}", cfg.command_group))?;
        }
        socket
            .set_nonblocking(true)
            .context("failed to set command socket nonblocking")?;
        info!(group = %cfg.command_group, port = cfg.command_port, "command listener ready");
        Ok(Self {
            socket,
            buf: [0u8; 256],
        })
    }
}

impl CommandSource for CommandSocket {
    fn poll_command(&mut self) -> Option<Command> {
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((len, _)) => {
                    // Undecodable datagrams are skipped, not returned.
                    if let Some(command) = Command::from_datagram(&self.buf[..len]) {
                        return Some(command);
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

/// Build the NTP client on its configured local port.
pub fn ntp_client(cfg: &NetworkConfig) -> Result<NtpClient> {
    NtpClient::new(&cfg.ntp_server, cfg.ntp_server_port, cfg.ntp_local_port)
        .with_context(|| format!("failed to set up NTP client for {}", cfg.ntp_server))
}
