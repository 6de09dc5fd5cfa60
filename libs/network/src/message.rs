//! Inter-platform Wire Messages
//!
//! Every TCP frame exchanged between platforms is a [`Frame`]: the sender's
//! platform identifier and TCP listen port, followed by one [`WireMessage`].
//! The receiver derives the sender's node address from the connection's peer
//! IP plus `listen_port`, so a frame never has to describe its own host.
//!
//! ```text
//! ┌──────────┬─────────────────────────────────────────────┐
//! │ u32 (BE) │ Frame { platform_id, listen_port, body }    │
//! │  length  │ serialized with the configured WireCodec    │
//! └──────────┴─────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use types::{Envelope, PlatformId};

/// How a delivered envelope must be treated by the receiving router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Deliver to the named recipient
    Unicast,
    /// Deliver to every local entity except the sender, never re-broadcast
    Broadcast,
    /// Deliver to every local entity playing the role class
    Rolecast { role: String },
    /// Deliver to the local subscribers of the envelope's event type
    Event,
    /// Resolve the envelope's capability against local subscribers only
    ResolveCapability,
}

/// Direction of a directory propagation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationKind {
    Addition,
    Removal,
}

/// Body of an inter-platform frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Routed envelope
    Deliver {
        mode: DeliveryMode,
        envelope: Envelope,
    },
    /// Directory propagation
    ///
    /// `snapshot` marks the full local directory sent during the handshake;
    /// otherwise `names` is an incremental change. `reply_requested` asks the
    /// receiver to answer with its own snapshot.
    Directory {
        kind: PropagationKind,
        names: Vec<String>,
        snapshot: bool,
        reply_requested: bool,
    },
    /// Sender is leaving; purge everything attributed to it
    Disconnect,
    /// Liveness ping
    Heartbeat,
}

impl WireMessage {
    /// Full-directory handshake message
    pub fn snapshot(names: Vec<String>, reply_requested: bool) -> Self {
        WireMessage::Directory {
            kind: PropagationKind::Addition,
            names,
            snapshot: true,
            reply_requested,
        }
    }

    /// Single-name incremental change
    pub fn change(kind: PropagationKind, name: impl Into<String>) -> Self {
        WireMessage::Directory {
            kind,
            names: vec![name.into()],
            snapshot: false,
            reply_requested: false,
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            WireMessage::Deliver { .. } => "deliver",
            WireMessage::Directory { snapshot: true, .. } => "snapshot",
            WireMessage::Directory { .. } => "directory-change",
            WireMessage::Disconnect => "disconnect",
            WireMessage::Heartbeat => "heartbeat",
        }
    }
}

/// Framed unit on an inter-platform TCP connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub platform_id: PlatformId,
    /// Sender's TCP listen port (not the ephemeral source port)
    pub listen_port: u16,
    pub body: WireMessage,
}

impl Frame {
    pub fn new(platform_id: PlatformId, listen_port: u16, body: WireMessage) -> Self {
        Self {
            platform_id,
            listen_port,
            body,
        }
    }
}
