//! Network Layer
//!
//! Owns a dedicated tokio runtime running:
//!
//! - the TCP accept loop and one reader task per inbound connection
//! - one writer task per outbound peer link, fed by an unbounded channel so
//!   router threads never block on the network
//! - the discovery announcer and listener (optional)
//! - the heartbeat task (optional)
//!
//! Every public method is synchronous and may be called from any thread.
//! [`NetworkLayer::initiate_with`] is the only blocking call: it waits on the
//! remote directory's condition variable until the handshake completes or
//! the timeout expires.
//!
//! ## Handshake
//!
//! ```text
//!   A                                         B
//!   │ upsert_pending(B)                       │
//!   │── Directory{snapshot, reply_requested}─►│ record A, names, reply
//!   │◄─ Directory{snapshot} ──────────────────│ mark_propagated(A)
//!   │ mark_propagated(B), wake waiters        │
//! ```
//!
//! Inbound traffic reaches the router through [`InboundHandler`]; this crate
//! never depends on the actor runtime.

use crate::codec::WireCodec;
use crate::discovery::{self, LocalIdentity};
use crate::heartbeat;
use crate::message::{DeliveryMode, Frame, PropagationKind, WireMessage};
use crate::remote::{HandshakeOutcome, NodeSummary, RemoteDirectory};
use crate::transports::{tcp, DiscoverySocket};
use crate::{Result, TransportError};
use bytes::Bytes;
use config::defaults;
use config::{DiscoveryConfig, HeartbeatConfig, NetworkConfig, RuntimeConfig};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use types::{Envelope, NodeAddress, PlatformId, PlatformRef};

/// Receiver of envelopes that arrived from peers
pub trait InboundHandler: Send + Sync {
    /// Route an envelope received from `from`
    fn deliver(&self, mode: DeliveryMode, envelope: Envelope, from: NodeAddress);

    /// Every locally registered entity name, for directory snapshots
    fn local_names(&self) -> Vec<String>;
}

enum PeerCommand {
    Send(Bytes),
    /// Acknowledged once every earlier frame has been written
    Flush(crossbeam_channel::Sender<()>),
}

struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<PeerCommand>,
}

/// State shared by the public handle and every network task
pub(crate) struct Shared {
    pub(crate) identity: LocalIdentity,
    codec: WireCodec,
    network: NetworkConfig,
    discovery: DiscoveryConfig,
    pub(crate) heartbeat: HeartbeatConfig,
    pub(crate) remote: Arc<RemoteDirectory>,
    links: DashMap<NodeAddress, Link>,
    next_link_id: AtomicU64,
    handler: Weak<dyn InboundHandler>,
    handle: Handle,
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl Shared {
    fn frame(&self, body: WireMessage) -> Result<Bytes> {
        self.codec.encode(&Frame::new(
            self.identity.platform_id,
            self.identity.node.port,
            body,
        ))
    }

    /// Sender feeding the writer task of `node`, spawning it if needed
    fn link(self: &Arc<Self>, node: NodeAddress) -> mpsc::UnboundedSender<PeerCommand> {
        if let Some(link) = self.links.get(&node) {
            return link.tx.clone();
        }
        self.links
            .entry(node)
            .or_insert_with(|| {
                let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = mpsc::unbounded_channel();
                self.handle.spawn(write_loop(self.clone(), node, id, rx));
                Link { id, tx }
            })
            .tx
            .clone()
    }

    pub(crate) fn send_frame(self: &Arc<Self>, node: NodeAddress, body: WireMessage) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let label = body.label();
        let bytes = self.frame(body)?;
        self.link(node)
            .send(PeerCommand::Send(bytes))
            .map_err(|_| TransportError::connection("Peer link closed", Some(node.socket_addr())))?;
        debug!(node = %node, message = label, "Frame queued");
        Ok(())
    }

    fn send_snapshot(self: &Arc<Self>, node: NodeAddress, reply_requested: bool) -> Result<()> {
        let names = match self.handler.upgrade() {
            Some(handler) => handler.local_names(),
            None => Vec::new(),
        };
        debug!(node = %node, entities = names.len(), reply_requested, "Sending directory snapshot");
        self.send_frame(node, WireMessage::snapshot(names, reply_requested))
    }

    /// Forget `node`: close its link and purge everything attributed to it
    ///
    /// With `link_id`, only acts if that link is still the current one; a
    /// failing writer must not tear down a newer link.
    pub(crate) fn drop_peer(&self, node: NodeAddress, link_id: Option<u64>) {
        match link_id {
            Some(id) => {
                if self.links.remove_if(&node, |_, link| link.id == id).is_none() {
                    return;
                }
            }
            None => {
                self.links.remove(&node);
            }
        }
        if let Some(record) = self.remote.purge(&node) {
            info!(
                node = %node,
                entities = record.names.len(),
                alias = ?record.alias,
                "Peer removed"
            );
        }
    }

    /// Discovery-initiated handshake; a watchdog purges the peer if it does
    /// not complete in time
    fn begin_handshake(self: &Arc<Self>, node: NodeAddress) {
        if !self.remote.upsert_pending(node) {
            return;
        }
        if let Err(e) = self.send_snapshot(node, true) {
            warn!(node = %node, error = %e, "Failed to start handshake");
            self.drop_peer(node, None);
            return;
        }

        let shared = self.clone();
        let timeout = self.discovery.handshake_timeout();
        self.handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if shared.remote.knows_node(&node) && !shared.remote.is_propagated(&node) {
                warn!(
                    node = %node,
                    timeout_ms = timeout.as_millis() as u64,
                    "Handshake timed out, peer purged"
                );
                shared.drop_peer(node, None);
            }
        });
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame, peer_ip: IpAddr) {
        if frame.platform_id == self.identity.platform_id {
            debug!("Dropping frame from own platform");
            return;
        }
        let node = NodeAddress::new(peer_ip, frame.listen_port);
        self.remote.touch(&node);

        match frame.body {
            WireMessage::Directory {
                kind: PropagationKind::Addition,
                names,
                snapshot: true,
                reply_requested,
            } => self.on_snapshot(node, frame.platform_id, names, reply_requested),
            WireMessage::Directory { kind, names, .. } => {
                if self.remote.node_of_platform(&frame.platform_id) != Some(node) {
                    debug!(node = %node, "Directory change from unknown peer ignored");
                    return;
                }
                match kind {
                    PropagationKind::Addition => {
                        self.remote.add_names(node, &names);
                    }
                    PropagationKind::Removal => self.remote.remove_names(node, &names),
                }
                debug!(node = %node, ?kind, names = ?names, "Directory change applied");
            }
            WireMessage::Deliver { mode, envelope } => self.on_deliver(node, mode, envelope),
            WireMessage::Disconnect => {
                info!(node = %node, "Peer disconnected");
                self.drop_peer(node, None);
            }
            WireMessage::Heartbeat => {}
        }
    }

    fn on_snapshot(
        self: &Arc<Self>,
        node: NodeAddress,
        platform_id: PlatformId,
        names: Vec<String>,
        reply_requested: bool,
    ) {
        self.remote.record_platform(node, platform_id);
        self.remote.replace_names(node, &names);
        info!(
            node = %node,
            platform_id = %platform_id,
            entities = names.len(),
            "Directory snapshot received"
        );

        if reply_requested {
            if let Err(e) = self.send_snapshot(node, false) {
                warn!(node = %node, error = %e, "Failed to answer handshake");
                return;
            }
        }
        self.remote.mark_propagated(node);
    }

    fn on_deliver(&self, node: NodeAddress, mode: DeliveryMode, mut envelope: Envelope) {
        if envelope.has_visited(&self.identity.node) {
            debug!(node = %node, sender = %envelope.sender, "Envelope already visited this node, dropped");
            return;
        }
        // The direct sender is the origin; its address as seen from here is
        // the one to answer to
        if envelope.visited.len() <= 1 {
            envelope.sender_node = Some(node);
        }
        match self.handler.upgrade() {
            Some(handler) => handler.deliver(mode, envelope, node),
            None => debug!(node = %node, "Router gone, inbound envelope dropped"),
        }
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    node: NodeAddress,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<PeerCommand>,
) {
    let stream = match tcp::connect(node.socket_addr(), shared.network.connect_timeout()).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(node = %node, error = %e, "Connection to peer failed");
            shared.drop_peer(node, Some(id));
            return;
        }
    };
    let (_reader, mut writer) = match tcp::split(stream, shared.network.max_frame_size) {
        Ok(halves) => halves,
        Err(e) => {
            warn!(node = %node, error = %e, "Connection to peer unusable");
            shared.drop_peer(node, Some(id));
            return;
        }
    };
    debug!(node = %node, link = id, "Peer link established");

    while let Some(command) = rx.recv().await {
        match command {
            PeerCommand::Send(bytes) => {
                if let Err(e) = writer.write_frame(&bytes).await {
                    warn!(node = %node, error = %e, "Write to peer failed");
                    shared.drop_peer(node, Some(id));
                    return;
                }
            }
            PeerCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    writer.close().await;
    debug!(node = %node, link = id, "Peer link closed");
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let mut shutdown = shared.shutdown_tx.subscribe();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                debug!(peer = %peer_addr, "Accepted inter-platform connection");
                match tcp::split(stream, shared.network.max_frame_size) {
                    Ok((reader, _writer)) => {
                        shared.handle.spawn(read_loop(shared.clone(), reader));
                    }
                    Err(e) => warn!(peer = %peer_addr, error = %e, "Dropping connection"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn read_loop(shared: Arc<Shared>, mut reader: tcp::FrameReader) {
    let peer_addr = reader.peer_addr();
    let mut shutdown = shared.shutdown_tx.subscribe();
    loop {
        let read = tokio::select! {
            read = reader.read_frame() => read,
            _ = shutdown.changed() => break,
        };
        match read {
            Ok(Some(bytes)) => match shared.codec.decode(&bytes) {
                Ok(frame) => shared.handle_frame(frame, peer_addr.ip()),
                Err(e) => warn!(peer = %peer_addr, error = %e, "Undecodable frame skipped"),
            },
            Ok(None) => {
                debug!(peer = %peer_addr, "Inbound connection closed");
                break;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "Inbound connection failed");
                break;
            }
        }
    }
}

/// Handle to a running network layer
pub struct NetworkLayer {
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
}

impl NetworkLayer {
    /// Bind the listener, then start discovery and heartbeat as configured
    ///
    /// A listener bind failure is fatal. A discovery socket failure only
    /// disables discovery.
    pub fn start(
        config: &RuntimeConfig,
        platform_id: PlatformId,
        handler: Weak<dyn InboundHandler>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mycelium-net")
            .enable_all()
            .build()
            .map_err(|e| TransportError::io("Failed to build network runtime", e))?;

        let net = &config.network;
        let std_listener = tcp::bind_listener(&net.bind_host, net.listen_port, net.dynamic_port, net.port_attempts)?;
        let local_addr = std_listener.local_addr()?;
        let identity = LocalIdentity::new(platform_id, local_addr.ip(), local_addr.port(), net.serialization);

        let (shutdown_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            identity,
            codec: WireCodec::new(net.serialization),
            network: net.clone(),
            discovery: config.discovery.clone(),
            heartbeat: config.heartbeat.clone(),
            remote: Arc::new(RemoteDirectory::new()),
            links: DashMap::new(),
            next_link_id: AtomicU64::new(1),
            handler,
            handle: runtime.handle().clone(),
            shutdown_tx,
            stopped: AtomicBool::new(false),
        });

        {
            let _guard = runtime.enter();
            let listener = TcpListener::from_std(std_listener)
                .map_err(|e| TransportError::network_with_source("Failed to register TCP listener", e))?;
            runtime.spawn(accept_loop(shared.clone(), listener));

            if config.discovery.enabled {
                match DiscoverySocket::bind(&config.discovery) {
                    Ok(socket) => Self::spawn_discovery(&runtime, &shared, socket),
                    Err(e) => warn!(
                        error = %e,
                        port = config.discovery.port,
                        "Discovery disabled: socket setup failed"
                    ),
                }
            }

            if config.heartbeat.enabled {
                runtime.spawn(heartbeat::heartbeat_loop(
                    shared.clone(),
                    shared.shutdown_tx.subscribe(),
                ));
            }
        }

        info!(
            node = %shared.identity.node,
            platform_id = %platform_id,
            serialization = net.serialization.tag(),
            discovery = config.discovery.enabled,
            heartbeat = config.heartbeat.enabled,
            "Network layer started"
        );

        Ok(Self {
            shared,
            runtime: Mutex::new(Some(runtime)),
        })
    }

    fn spawn_discovery(runtime: &Runtime, shared: &Arc<Shared>, socket: DiscoverySocket) {
        let socket = Arc::new(socket);
        let discovery = &shared.discovery;

        runtime.spawn(discovery::announce_loop(
            socket.clone(),
            shared.identity.clone(),
            shared.remote.clone(),
            discovery.announce_interval(),
            discovery.quiet_when_connected,
            shared.shutdown_tx.subscribe(),
        ));

        let initiator = Arc::downgrade(shared);
        runtime.spawn(discovery::listen_loop(
            socket,
            shared.identity.clone(),
            shared.remote.clone(),
            move |node| {
                if let Some(shared) = initiator.upgrade() {
                    shared.begin_handshake(node);
                }
            },
            shared.shutdown_tx.subscribe(),
        ));
    }

    /// Address stamped on forwarded envelopes
    pub fn local_node(&self) -> NodeAddress {
        self.shared.identity.node
    }

    pub fn platform_id(&self) -> PlatformId {
        self.shared.identity.platform_id
    }

    pub fn remote(&self) -> &Arc<RemoteDirectory> {
        &self.shared.remote
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::Acquire)
    }

    /// Send `envelope` to the platform at `node`
    pub fn forward(&self, node: NodeAddress, mode: DeliveryMode, mut envelope: Envelope) -> Result<()> {
        envelope.mark_forwarded_by(self.shared.identity.node);
        self.shared.send_frame(node, WireMessage::Deliver { mode, envelope })
    }

    /// Send `envelope` to every connected peer it has not visited yet;
    /// returns the peers it was queued for
    pub fn broadcast(&self, mode: DeliveryMode, mut envelope: Envelope) -> Vec<NodeAddress> {
        envelope.mark_forwarded_by(self.shared.identity.node);
        let mut reached = Vec::new();
        for node in self.shared.remote.connected_nodes() {
            if envelope.has_visited(&node) {
                continue;
            }
            let body = WireMessage::Deliver {
                mode: mode.clone(),
                envelope: envelope.clone(),
            };
            match self.shared.send_frame(node, body) {
                Ok(()) => reached.push(node),
                Err(e) => warn!(node = %node, error = %e, "Broadcast to peer failed"),
            }
        }
        reached
    }

    /// Tell connected peers about a newly registered entity
    pub fn propagate_addition(&self, name: &str) {
        self.propagate(PropagationKind::Addition, name);
    }

    /// Tell connected peers an entity went away
    pub fn propagate_removal(&self, name: &str) {
        self.propagate(PropagationKind::Removal, name);
    }

    fn propagate(&self, kind: PropagationKind, name: &str) {
        for node in self.shared.remote.connected_nodes() {
            if let Err(e) = self.shared.send_frame(node, WireMessage::change(kind, name)) {
                warn!(node = %node, entity = name, ?kind, error = %e, "Propagation failed");
            }
        }
    }

    /// Run the propagation handshake with `host:port`, blocking until both
    /// directories were exchanged or `timeout` elapses
    ///
    /// On failure every trace of the peer is purged so discovery can find
    /// it again later.
    pub fn initiate_with(&self, host: &str, port: u16, timeout: Duration) -> Result<NodeAddress> {
        let node = self.resolve_host(host, port)?;
        if node == self.shared.identity.node
            || (self.shared.identity.is_local_ip(&node.ip) && node.port == self.shared.identity.node.port)
        {
            return Err(TransportError::configuration(
                "Refusing to connect a platform to itself",
                Some("port"),
            ));
        }
        if self.shared.remote.is_propagated(&node) {
            debug!(node = %node, "Already connected");
            return Ok(node);
        }

        let started = Instant::now();
        self.shared.remote.upsert_pending(node);
        if let Err(e) = self.shared.send_snapshot(node, true) {
            self.shared.drop_peer(node, None);
            error!(node = %node, error = %e, "Handshake could not start");
            return Err(e);
        }

        match self.shared.remote.wait_for_propagation(&node, timeout) {
            HandshakeOutcome::Propagated => {
                info!(node = %node, elapsed_ms = started.elapsed().as_millis() as u64, "Handshake complete");
                Ok(node)
            }
            HandshakeOutcome::Gone => {
                self.shared.drop_peer(node, None);
                error!(node = %node, "Handshake failed: peer unreachable or disconnected");
                Err(TransportError::handshake(node, "peer unreachable or disconnected"))
            }
            HandshakeOutcome::TimedOut => {
                self.shared.drop_peer(node, None);
                let timeout_ms = timeout.as_millis() as u64;
                error!(node = %node, timeout_ms, "Handshake timed out");
                Err(TransportError::timeout("propagation handshake", timeout_ms))
            }
        }
    }

    /// [`initiate_with`](Self::initiate_with), then bind `alias` to the peer
    pub fn connect(&self, host: &str, port: u16, alias: Option<&str>, timeout: Duration) -> Result<NodeAddress> {
        let node = self.initiate_with(host, port, timeout)?;
        if let Some(alias) = alias {
            self.shared.remote.set_alias(alias, node);
            info!(node = %node, alias, "Alias registered");
        }
        Ok(node)
    }

    /// Bind `alias` to a known node
    pub fn set_alias(&self, alias: &str, node: NodeAddress) -> bool {
        self.shared.remote.set_alias(alias, node)
    }

    pub fn remove_alias(&self, alias: &str) -> Option<NodeAddress> {
        self.shared.remote.remove_alias(alias)
    }

    /// Connected node named by the platform part of `name@host[:port]`
    ///
    /// `host` is looked up in the alias table first (an explicit port
    /// overrides the alias port), then taken as a literal host.
    pub fn resolve_platform(&self, platform: &PlatformRef) -> Option<NodeAddress> {
        let remote = &self.shared.remote;
        let node = match remote.resolve_alias(&platform.host) {
            Some(node) => NodeAddress::new(node.ip, platform.port.unwrap_or(node.port)),
            None => {
                let port = platform.port?;
                self.resolve_host(&platform.host, port).ok()?
            }
        };
        remote.is_propagated(&node).then_some(node)
    }

    fn resolve_host(&self, host: &str, port: u16) -> Result<NodeAddress> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(NodeAddress::new(ip, port));
        }
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::network_with_source(format!("Failed to resolve '{}'", host), e))?
            .collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .map(|a| NodeAddress::from(*a))
            .ok_or_else(|| TransportError::network(format!("No address for '{}'", host)))
    }

    /// Remote nodes hosting `name`
    pub fn nodes_for(&self, name: &str) -> Vec<NodeAddress> {
        self.shared.remote.nodes_for(name)
    }

    pub fn remote_names(&self) -> Vec<String> {
        self.shared.remote.remote_names()
    }

    pub fn connected_count(&self) -> usize {
        self.shared.remote.connected_count()
    }

    pub fn snapshot(&self) -> Vec<NodeSummary> {
        self.shared.remote.snapshot()
    }

    /// Tell `node` we are leaving it and forget it
    pub fn disconnect(&self, node: NodeAddress) {
        if let Err(e) = self.shared.send_frame(node, WireMessage::Disconnect) {
            debug!(node = %node, error = %e, "Disconnect notice not sent");
        }
        self.shared.drop_peer(node, None);
    }

    /// Notify peers, stop every task and release the runtime
    ///
    /// Idempotent; safe to call from inside another runtime.
    pub fn shutdown(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut acks = Vec::new();
        if let Ok(bytes) = self.shared.frame(WireMessage::Disconnect) {
            for node in self.shared.remote.connected_nodes() {
                if let Some(link) = self.shared.links.get(&node) {
                    let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
                    let queued = link.tx.send(PeerCommand::Send(bytes.clone())).is_ok()
                        && link.tx.send(PeerCommand::Flush(ack_tx)).is_ok();
                    if queued {
                        acks.push(ack_rx);
                    }
                }
            }
        }
        let deadline = Instant::now() + Duration::from_millis(defaults::network::SHUTDOWN_FLUSH_MS);
        let notified = acks.into_iter().filter(|rx| rx.recv_deadline(deadline).is_ok()).count();

        let _ = self.shared.shutdown_tx.send(true);
        self.shared.links.clear();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        info!(node = %self.shared.identity.node, peers_notified = notified, "Network layer stopped");
    }
}

impl Drop for NetworkLayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
