//! Discovery and wire protocol constants
//!
//! Shared between the announcer and the listener so both sides agree on the
//! packet layout without negotiating.

/// Prefix of every discovery datagram; anything else is foreign traffic
pub const DISCOVERY_MAGIC: &str = "MYCELIUM1";

/// Field separator inside a discovery datagram
pub const DISCOVERY_SEPARATOR: char = '|';

/// Fixed discovery datagram size (fields are NUL-padded to this length)
pub const DISCOVERY_PACKET_SIZE: usize = 96;

/// Length prefix size for TCP frames
pub const FRAME_HEADER_SIZE: usize = 4;

/// Serialization tags announced in discovery packets
pub mod serialization {
    pub const JSON: &str = "json";
    pub const BINCODE: &str = "bincode";
}
