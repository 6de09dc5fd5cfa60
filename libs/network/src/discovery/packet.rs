//! Announce Packet
//!
//! Fixed-size ASCII datagram `MAGIC|tcpPort|platformId|serializationTag`,
//! NUL-padded to [`DISCOVERY_PACKET_SIZE`] bytes.

use config::protocol::{DISCOVERY_MAGIC, DISCOVERY_PACKET_SIZE, DISCOVERY_SEPARATOR};
use thiserror::Error;
use types::PlatformId;

/// Why a datagram was not accepted as an announcement
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// No magic prefix: traffic from something else on the port
    #[error("foreign datagram")]
    Foreign,

    #[error("malformed announce packet: {0}")]
    Malformed(String),
}

/// Decoded announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncePacket {
    pub port: u16,
    pub platform_id: PlatformId,
    pub serialization: String,
}

impl AnnouncePacket {
    pub fn new(port: u16, platform_id: PlatformId, serialization: impl Into<String>) -> Self {
        Self {
            port,
            platform_id,
            serialization: serialization.into(),
        }
    }

    /// Fixed-size datagram; fields beyond the packet size are cut
    pub fn encode(&self) -> Vec<u8> {
        let text = format!(
            "{magic}{sep}{port}{sep}{pid}{sep}{tag}",
            magic = DISCOVERY_MAGIC,
            sep = DISCOVERY_SEPARATOR,
            port = self.port,
            pid = self.platform_id,
            tag = self.serialization,
        );
        let mut bytes = text.into_bytes();
        bytes.resize(DISCOVERY_PACKET_SIZE, 0);
        bytes
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if !data.starts_with(DISCOVERY_MAGIC.as_bytes()) {
            return Err(PacketError::Foreign);
        }

        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
        let text = std::str::from_utf8(&data[..end])
            .map_err(|_| PacketError::Malformed("not ASCII".to_string()))?;

        let fields: Vec<&str> = text.split(DISCOVERY_SEPARATOR).collect();
        let [magic, port, pid, tag] = fields.as_slice() else {
            return Err(PacketError::Malformed(format!(
                "expected 4 fields, got {}",
                fields.len()
            )));
        };
        if *magic != DISCOVERY_MAGIC {
            return Err(PacketError::Foreign);
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| PacketError::Malformed(format!("bad port '{}'", port)))?;
        let platform_id = pid
            .parse::<PlatformId>()
            .map_err(|_| PacketError::Malformed(format!("bad platform id '{}'", pid)))?;
        if tag.is_empty() {
            return Err(PacketError::Malformed("empty serialization tag".to_string()));
        }

        Ok(Self::new(port, platform_id, *tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packet_is_fixed_size_ascii() {
        let packet = AnnouncePacket::new(4242, PlatformId::generate(), "json");
        let bytes = packet.encode();
        assert_eq!(bytes.len(), DISCOVERY_PACKET_SIZE);
        assert!(bytes.starts_with(b"MYCELIUM1|4242|"));
        assert_eq!(AnnouncePacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_foreign_and_malformed() {
        assert_eq!(AnnouncePacket::decode(b"SSDP NOTIFY"), Err(PacketError::Foreign));
        assert_eq!(AnnouncePacket::decode(b"MYCELIUM10|1|x|json"), Err(PacketError::Foreign));
        assert!(matches!(
            AnnouncePacket::decode(b"MYCELIUM1|notaport|x|json"),
            Err(PacketError::Malformed(_))
        ));
        assert!(matches!(
            AnnouncePacket::decode(b"MYCELIUM1|4242"),
            Err(PacketError::Malformed(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_decode_recovers_announcement(port in any::<u16>(), tag in "[a-z0-9]{1,16}") {
            let packet = AnnouncePacket::new(port, PlatformId::generate(), tag);
            let bytes = packet.encode();
            prop_assert_eq!(bytes.len(), DISCOVERY_PACKET_SIZE);
            prop_assert_eq!(AnnouncePacket::decode(&bytes), Ok(packet));
        }

        #[test]
        fn prop_arbitrary_datagrams_never_panic(data in prop::collection::vec(any::<u8>(), 0..128)) {
            let _ = AnnouncePacket::decode(&data);
        }
    }
}
