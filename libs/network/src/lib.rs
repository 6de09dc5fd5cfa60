//! # Mycelium Network Layer
//!
//! Connects platforms running in different processes or on different hosts.
//!
//! ## Components
//!
//! - [`transports`]: TCP framing and the UDP discovery socket
//! - [`codec`]: JSON or bincode frame serialization
//! - [`message`]: inter-platform [`Frame`]s and [`WireMessage`]s
//! - [`discovery`]: announce packets and the listener decision logic
//! - [`remote`]: the [`RemoteDirectory`] of peers, their entities and aliases
//! - [`connector`]: the [`NetworkLayer`] runtime, propagation handshake,
//!   forwarding and shutdown
//! - `heartbeat`: optional peer liveness checks
//!
//! ## Guarantees
//!
//! Best effort only: no retries, no acknowledgements, no ordering across
//! peers. Frames to one peer are written in the order they were queued.
//! Traffic is neither authenticated nor encrypted.

pub mod codec;
pub mod connector;
pub mod discovery;
pub mod error;
mod heartbeat;
pub mod message;
pub mod remote;
pub mod transports;

pub use codec::WireCodec;
pub use connector::{InboundHandler, NetworkLayer};
pub use discovery::{AnnouncePacket, AnnounceVerdict, LocalIdentity};
pub use error::{Result, TransportError};
pub use message::{DeliveryMode, Frame, PropagationKind, WireMessage};
pub use remote::{HandshakeOutcome, NodeRecord, NodeSummary, RemoteDirectory};
