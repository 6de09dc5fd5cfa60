//! UDP Discovery Socket
//!
//! Datagram socket shared by the announcer and the listener. Several
//! platforms on one host must all receive announcements, so the socket is
//! created through `nix` with `SO_REUSEADDR` and `SO_REUSEPORT` set before
//! binding, then handed to tokio.

use crate::{Result, TransportError};
use config::{DiscoveryConfig, DiscoveryMode};
use nix::sys::socket::{bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::AsRawFd;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Bound discovery socket plus the destination of announcements
pub struct DiscoverySocket {
    socket: UdpSocket,
    target: SocketAddr,
}

impl DiscoverySocket {
    /// Bind `0.0.0.0:<discovery port>` and join the group (multicast mode)
    /// or enable broadcast
    ///
    /// Must be called from within a tokio runtime context.
    pub fn bind(config: &DiscoveryConfig) -> Result<Self> {
        let std_socket = reusable_socket(config.port)?;

        let target = match config.mode {
            DiscoveryMode::Multicast => {
                let group = config.group().map_err(|e| {
                    TransportError::configuration(e.to_string(), Some("discovery.multicast_group"))
                })?;
                std_socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED).map_err(|e| {
                    TransportError::network_with_source(
                        format!("Failed to join multicast group {}", group),
                        e,
                    )
                })?;
                std_socket.set_multicast_loop_v4(true)?;
                info!(group = %group, port = config.port, "Joined discovery multicast group");
                SocketAddr::V4(SocketAddrV4::new(group, config.port))
            }
            DiscoveryMode::Broadcast => {
                std_socket.set_broadcast(true)?;
                info!(port = config.port, "Discovery using UDP broadcast");
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, config.port))
            }
        };

        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::network_with_source("Failed to register UDP socket", e))?;

        Ok(Self { socket, target })
    }

    /// Socket on an ephemeral loopback port announcing straight to `target`
    #[cfg(test)]
    pub(crate) fn loopback(target: SocketAddr) -> Result<Self> {
        let std_socket = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::network_with_source("Failed to register UDP socket", e))?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub async fn announce(&self, packet: &[u8]) -> Result<()> {
        let sent = self
            .socket
            .send_to(packet, self.target)
            .await
            .map_err(|e| TransportError::network_with_source("Failed to send announce packet", e))?;
        debug!(target = %self.target, bytes = sent, "Announce sent");
        Ok(())
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket
            .recv_from(buf)
            .await
            .map_err(|e| TransportError::network_with_source("Failed to receive discovery packet", e))
    }
}

fn reusable_socket(port: u16) -> Result<std::net::UdpSocket> {
    let fd = socket(AddressFamily::Inet, SockType::Datagram, SockFlag::empty(), None)
        .map_err(|e| TransportError::network_with_source("Failed to create UDP socket", std::io::Error::from(e)))?;

    setsockopt(&fd, sockopt::ReuseAddr, &true)
        .map_err(|e| TransportError::network_with_source("Failed to set SO_REUSEADDR", std::io::Error::from(e)))?;
    setsockopt(&fd, sockopt::ReusePort, &true)
        .map_err(|e| TransportError::network_with_source("Failed to set SO_REUSEPORT", std::io::Error::from(e)))?;

    let addr = SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    bind(fd.as_raw_fd(), &addr).map_err(|e| {
        TransportError::network_with_source(
            format!("Failed to bind discovery socket on port {}", port),
            std::io::Error::from(e),
        )
    })?;

    Ok(std::net::UdpSocket::from(fd))
}
