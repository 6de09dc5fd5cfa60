//! Peer Liveness
//!
//! Each interval, every connected peer gets a heartbeat frame and every peer
//! silent for `interval × timeout_multiplier` is purged exactly like an
//! explicit disconnect. Any inbound frame counts as a sign of life, so both
//! sides must run the heartbeat for an otherwise idle link to stay up.

use crate::connector::Shared;
use crate::message::WireMessage;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

pub(crate) async fn heartbeat_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let interval = shared.heartbeat.interval();
    let timeout = shared.heartbeat.timeout();
    let mut ticker = tokio::time::interval(interval);

    debug!(
        interval_ms = interval.as_millis() as u64,
        timeout_ms = timeout.as_millis() as u64,
        "Heartbeat started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        for node in shared.remote.connected_nodes() {
            if let Err(e) = shared.send_frame(node, WireMessage::Heartbeat) {
                debug!(node = %node, error = %e, "Heartbeat not sent");
            }
        }

        for node in shared.remote.stale_nodes(timeout) {
            warn!(
                node = %node,
                timeout_ms = timeout.as_millis() as u64,
                "Peer missed heartbeats, purging"
            );
            shared.drop_peer(node, None);
        }
    }
    debug!("Heartbeat stopped");
}
