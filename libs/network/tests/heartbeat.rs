//! Peer liveness: heartbeats keep idle links up, silent peers are purged
//! without any disconnect notice.

use config::{RuntimeConfig, SerializationFormat};
use network::{DeliveryMode, Frame, InboundHandler, NetworkLayer, WireCodec, WireMessage};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use types::{Envelope, NodeAddress, PlatformId};

const INTERVAL_MS: u64 = 100;
const MULTIPLIER: u32 = 3;

struct Quiet;

impl InboundHandler for Quiet {
    fn deliver(&self, _mode: DeliveryMode, _envelope: Envelope, _from: NodeAddress) {}

    fn local_names(&self) -> Vec<String> {
        vec!["local".to_string()]
    }
}

fn heartbeat_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::distributed(0);
    config.heartbeat.enabled = true;
    config.heartbeat.interval_ms = INTERVAL_MS;
    config.heartbeat.timeout_multiplier = MULTIPLIER;
    config
}

fn start(handler: &Arc<Quiet>) -> NetworkLayer {
    let weak: Weak<dyn InboundHandler> = Arc::downgrade(handler) as Weak<dyn InboundHandler>;
    NetworkLayer::start(&heartbeat_config(), PlatformId::generate(), weak).unwrap()
}

fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

/// A peer that completes the handshake over raw frames, then never speaks
/// again while keeping its sockets open
struct SilentPeer {
    port: u16,
    _outbound: TcpStream,
    _sink: thread::JoinHandle<()>,
}

impl SilentPeer {
    fn handshake(target_port: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        // Accept the layer's outbound link and swallow its heartbeats
        let sink = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
            }
        });

        let codec = WireCodec::new(SerializationFormat::Json);
        let frame = Frame::new(
            PlatformId::generate(),
            port,
            WireMessage::snapshot(vec!["ghost".to_string()], false),
        );
        let bytes = codec.encode(&frame).unwrap();

        let mut outbound = TcpStream::connect(("127.0.0.1", target_port)).unwrap();
        outbound.write_all(&(bytes.len() as u32).to_be_bytes()).unwrap();
        outbound.write_all(&bytes).unwrap();
        outbound.flush().unwrap();

        Self {
            port,
            _outbound: outbound,
            _sink: sink,
        }
    }
}

#[test]
fn test_silent_peer_is_purged_after_timeout() {
    let handler = Arc::new(Quiet);
    let layer = start(&handler);

    let peer = SilentPeer::handshake(layer.local_node().port);
    eventually("the silent peer to be recorded", || {
        layer.remote_names() == vec!["ghost".to_string()]
    });
    let recorded = Instant::now();
    let node = layer.snapshot()[0].node;
    assert_eq!(node.port, peer.port);

    eventually("the silent peer to be purged", || layer.connected_count() == 0);
    let timeout = Duration::from_millis(INTERVAL_MS * MULTIPLIER as u64);
    assert!(recorded.elapsed() >= timeout - Duration::from_millis(INTERVAL_MS));
    assert!(layer.remote_names().is_empty());
    assert!(!layer.remote().knows_node(&node));
}

#[test]
fn test_heartbeats_keep_idle_peers_connected() {
    let handler = Arc::new(Quiet);
    let a = start(&handler);
    let b = start(&handler);

    a.initiate_with("127.0.0.1", b.local_node().port, Duration::from_secs(5))
        .unwrap();
    eventually("b to see the handshake complete", || b.connected_count() == 1);

    // Several timeouts worth of idle time
    thread::sleep(Duration::from_millis(INTERVAL_MS * MULTIPLIER as u64 * 4));

    assert_eq!(a.connected_count(), 1);
    assert_eq!(b.connected_count(), 1);
}
