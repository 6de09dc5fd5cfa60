//! Peer Discovery
//!
//! Periodic UDP announcements and the listener that turns a heard
//! announcement into a propagation handshake. The decision itself is the pure
//! function [`evaluate`]; the loops only do I/O around it.
//!
//! Listener filtering, in order:
//!
//! 1. no magic prefix: foreign traffic, ignored
//! 2. own platform id: self-echo, ignored
//! 3. different serialization tag: incompatible, logged, ignored
//! 4. own address and own port: ignored
//! 5. node address or platform id already known: ignored
//! 6. otherwise: initiate a handshake with `(sender ip, announced port)`

pub mod packet;

pub use packet::{AnnouncePacket, PacketError};

use crate::remote::RemoteDirectory;
use crate::transports::DiscoverySocket;
use config::protocol::DISCOVERY_PACKET_SIZE;
use config::SerializationFormat;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use types::{NodeAddress, PlatformId};

/// What this platform looks like from the outside
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub platform_id: PlatformId,
    /// Node address stamped on forwarded envelopes
    pub node: NodeAddress,
    pub format: SerializationFormat,
    /// Addresses under which this host may appear as a datagram source
    pub local_ips: HashSet<IpAddr>,
}

impl LocalIdentity {
    /// Build the identity of a platform listening on `bind_ip:port`
    ///
    /// An unspecified bind address is replaced by the host's outbound
    /// address so peers get a routable node in forwarded envelopes.
    pub fn new(platform_id: PlatformId, bind_ip: IpAddr, port: u16, format: SerializationFormat) -> Self {
        let outbound = outbound_ip();
        let mut local_ips: HashSet<IpAddr> = [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            bind_ip,
        ]
        .into_iter()
        .collect();
        if let Some(ip) = outbound {
            local_ips.insert(ip);
        }

        let node_ip = if bind_ip.is_unspecified() {
            outbound.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            bind_ip
        };

        Self {
            platform_id,
            node: NodeAddress::new(node_ip, port),
            format,
            local_ips,
        }
    }

    pub fn announce_packet(&self) -> AnnouncePacket {
        AnnouncePacket::new(self.node.port, self.platform_id, self.format.tag())
    }

    pub fn is_local_ip(&self, ip: &IpAddr) -> bool {
        ip.is_loopback() || self.local_ips.contains(ip)
    }
}

/// Address used for outbound traffic, found by connecting a UDP socket
/// (no packet is sent)
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Listener decision for one datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceVerdict {
    Foreign,
    Malformed(String),
    SelfEcho,
    Incompatible { tag: String },
    SelfAddress,
    AlreadyKnown(NodeAddress),
    Initiate(NodeAddress),
}

/// Decide what to do with a datagram received from `from_ip`
pub fn evaluate(
    data: &[u8],
    from_ip: IpAddr,
    identity: &LocalIdentity,
    remote: &RemoteDirectory,
) -> AnnounceVerdict {
    let packet = match AnnouncePacket::decode(data) {
        Ok(packet) => packet,
        Err(PacketError::Foreign) => return AnnounceVerdict::Foreign,
        Err(PacketError::Malformed(reason)) => return AnnounceVerdict::Malformed(reason),
    };

    if packet.platform_id == identity.platform_id {
        return AnnounceVerdict::SelfEcho;
    }
    if packet.serialization != identity.format.tag() {
        return AnnounceVerdict::Incompatible {
            tag: packet.serialization,
        };
    }
    if identity.is_local_ip(&from_ip) && packet.port == identity.node.port {
        return AnnounceVerdict::SelfAddress;
    }

    // Same-host peers are reached over loopback
    let ip = if identity.is_local_ip(&from_ip) {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        from_ip
    };
    let node = NodeAddress::new(ip, packet.port);

    let known_node = remote.knows_node(&node) || remote.knows_node(&NodeAddress::new(from_ip, packet.port));
    if known_node || remote.knows_platform(&packet.platform_id) {
        return AnnounceVerdict::AlreadyKnown(node);
    }
    AnnounceVerdict::Initiate(node)
}

/// Send the announce packet every `interval` until shutdown
///
/// With `quiet_when_connected`, announcing pauses while at least one peer is
/// connected and resumes on its own when the last one goes away.
pub(crate) async fn announce_loop(
    socket: Arc<DiscoverySocket>,
    identity: LocalIdentity,
    remote: Arc<RemoteDirectory>,
    interval: Duration,
    quiet_when_connected: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    let packet = identity.announce_packet().encode();
    let mut ticker = tokio::time::interval(interval);
    let mut quiet = false;

    info!(
        target_addr = %socket.target(),
        port = identity.node.port,
        platform_id = %identity.platform_id,
        "Discovery announcer started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let connected = remote.connected_count();
        if quiet_when_connected && connected > 0 {
            if !quiet {
                info!(peers = connected, "Peers connected, announcements paused");
                quiet = true;
            }
            continue;
        }
        if quiet {
            info!("No peers connected, announcements re-armed");
            quiet = false;
        }

        if let Err(e) = socket.announce(&packet).await {
            warn!(error = %e, "Announce failed");
        }
    }
    debug!("Discovery announcer stopped");
}

/// Receive announcements until shutdown, calling `initiate` for every new peer
pub(crate) async fn listen_loop<F>(
    socket: Arc<DiscoverySocket>,
    identity: LocalIdentity,
    remote: Arc<RemoteDirectory>,
    initiate: F,
    mut shutdown: watch::Receiver<bool>,
) where
    F: Fn(NodeAddress) + Send + Sync,
{
    let mut buf = [0u8; DISCOVERY_PACKET_SIZE * 2];

    loop {
        let received = tokio::select! {
            received = socket.recv(&mut buf) => received,
            _ = shutdown.changed() => break,
        };

        let (len, from) = match received {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "Discovery receive failed");
                continue;
            }
        };

        match evaluate(&buf[..len], from.ip(), &identity, &remote) {
            AnnounceVerdict::Initiate(node) => {
                info!(node = %node, "Discovered platform, starting handshake");
                initiate(node);
            }
            AnnounceVerdict::Incompatible { tag } => {
                warn!(
                    from = %from,
                    remote_format = %tag,
                    local_format = identity.format.tag(),
                    "Ignoring platform with incompatible serialization"
                );
            }
            AnnounceVerdict::Malformed(reason) => {
                debug!(from = %from, reason = %reason, "Malformed announce packet");
            }
            verdict => {
                debug!(from = %from, ?verdict, "Announce ignored");
            }
        }
    }
    debug!("Discovery listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(port: u16) -> LocalIdentity {
        LocalIdentity::new(
            PlatformId::generate(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            SerializationFormat::Json,
        )
    }

    fn remote_ip() -> IpAddr {
        "203.0.113.9".parse().unwrap()
    }

    #[test]
    fn test_own_packet_is_self_echo() {
        let me = identity(4400);
        let remote = RemoteDirectory::new();
        let bytes = me.announce_packet().encode();

        assert_eq!(
            evaluate(&bytes, IpAddr::V4(Ipv4Addr::LOCALHOST), &me, &remote),
            AnnounceVerdict::SelfEcho
        );
        assert_eq!(evaluate(&bytes, remote_ip(), &me, &remote), AnnounceVerdict::SelfEcho);
        assert!(remote.snapshot().is_empty());
    }

    #[test]
    fn test_incompatible_serialization() {
        let me = identity(4400);
        let remote = RemoteDirectory::new();
        let bytes = AnnouncePacket::new(4401, PlatformId::generate(), "bincode").encode();
        assert_eq!(
            evaluate(&bytes, remote_ip(), &me, &remote),
            AnnounceVerdict::Incompatible { tag: "bincode".into() }
        );
    }

    #[test]
    fn test_same_host_other_port_initiates_over_loopback() {
        let me = identity(4400);
        let remote = RemoteDirectory::new();

        let same_port = AnnouncePacket::new(4400, PlatformId::generate(), "json").encode();
        assert_eq!(
            evaluate(&same_port, IpAddr::V4(Ipv4Addr::LOCALHOST), &me, &remote),
            AnnounceVerdict::SelfAddress
        );

        let other_port = AnnouncePacket::new(4401, PlatformId::generate(), "json").encode();
        assert_eq!(
            evaluate(&other_port, IpAddr::V4(Ipv4Addr::LOCALHOST), &me, &remote),
            AnnounceVerdict::Initiate(NodeAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4401))
        );
    }

    #[test]
    fn test_known_node_or_platform_is_skipped() {
        let me = identity(4400);
        let remote = RemoteDirectory::new();
        let peer_id = PlatformId::generate();
        let bytes = AnnouncePacket::new(4500, peer_id, "json").encode();
        let node = NodeAddress::new(remote_ip(), 4500);

        assert_eq!(evaluate(&bytes, remote_ip(), &me, &remote), AnnounceVerdict::Initiate(node));

        remote.upsert_pending(node);
        assert_eq!(
            evaluate(&bytes, remote_ip(), &me, &remote),
            AnnounceVerdict::AlreadyKnown(node)
        );

        // Same platform seen under another address
        remote.purge(&node);
        remote.record_platform(NodeAddress::new("198.51.100.4".parse().unwrap(), 4500), peer_id);
        assert!(matches!(
            evaluate(&bytes, remote_ip(), &me, &remote),
            AnnounceVerdict::AlreadyKnown(_)
        ));
    }

    #[test]
    fn test_foreign_traffic() {
        let me = identity(4400);
        let remote = RemoteDirectory::new();
        assert_eq!(
            evaluate(b"M-SEARCH * HTTP/1.1", remote_ip(), &me, &remote),
            AnnounceVerdict::Foreign
        );
    }

    async fn heard(receiver: &tokio::net::UdpSocket, within: Duration) -> bool {
        let mut buf = [0u8; DISCOVERY_PACKET_SIZE * 2];
        tokio::time::timeout(within, receiver.recv_from(&mut buf))
            .await
            .map(|received| received.is_ok())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_announcements_pause_while_connected() {
        let receiver = tokio::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let socket = Arc::new(DiscoverySocket::loopback(receiver.local_addr().unwrap()).unwrap());
        let me = identity(4400);
        let remote = Arc::new(RemoteDirectory::new());
        let interval = Duration::from_millis(20);
        let (stop_tx, stop_rx) = watch::channel(false);

        let announcer = tokio::spawn(announce_loop(
            socket,
            me.clone(),
            remote.clone(),
            interval,
            true,
            stop_rx,
        ));

        let mut buf = [0u8; DISCOVERY_PACKET_SIZE * 2];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let packet = AnnouncePacket::decode(&buf[..len]).unwrap();
        assert_eq!(packet.platform_id, me.platform_id);

        let peer = NodeAddress::new(remote_ip(), 4500);
        remote.upsert_pending(peer);
        remote.mark_propagated(peer);

        // Let an in-flight tick land, then drain it
        tokio::time::sleep(interval * 3).await;
        while receiver.try_recv_from(&mut buf).is_ok() {}
        assert!(!heard(&receiver, interval * 10).await);

        remote.purge(&peer);
        assert!(heard(&receiver, Duration::from_secs(1)).await);

        stop_tx.send(true).unwrap();
        announcer.await.unwrap();
    }
}
