//! Transports
//!
//! - [`tcp`]: length-prefixed frames between connected platforms
//! - [`udp`]: the discovery datagram socket

pub mod tcp;
pub mod udp;

pub use tcp::{bind_listener, FrameReader, FrameWriter};
pub use udp::DiscoverySocket;
