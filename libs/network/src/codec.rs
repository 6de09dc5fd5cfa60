//! Wire Codec
//!
//! Pluggable frame serialization selected at configuration time. Both sides
//! of a connection must use the same format; discovery refuses to connect
//! platforms announcing a different serialization tag.

use crate::message::Frame;
use crate::{Result, TransportError};
use bytes::Bytes;
use config::SerializationFormat;

/// Encodes and decodes [`Frame`]s in the configured format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireCodec {
    format: SerializationFormat,
}

impl WireCodec {
    pub fn new(format: SerializationFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> SerializationFormat {
        self.format
    }

    pub fn encode(&self, frame: &Frame) -> Result<Bytes> {
        let bytes = match self.format {
            SerializationFormat::Json => serde_json::to_vec(frame)
                .map_err(|e| TransportError::protocol_with_source("JSON encode failed", e))?,
            SerializationFormat::Bincode => bincode::serialize(frame)
                .map_err(|e| TransportError::protocol_with_source("bincode encode failed", e))?,
        };
        Ok(Bytes::from(bytes))
    }

    pub fn decode(&self, data: &[u8]) -> Result<Frame> {
        match self.format {
            SerializationFormat::Json => serde_json::from_slice(data)
                .map_err(|e| TransportError::protocol_with_source("JSON decode failed", e)),
            SerializationFormat::Bincode => bincode::deserialize(data)
                .map_err(|e| TransportError::protocol_with_source("bincode decode failed", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeliveryMode, WireMessage};
    use types::{Envelope, Intent, PlatformId, Value};

    fn sample_frame() -> Frame {
        let envelope = Envelope::new("alice")
            .with_intent(Intent::new("lookup", Value::map([("key", "k1")])))
            .in_conversation("c-9", 1);
        Frame::new(
            PlatformId::generate(),
            4300,
            WireMessage::Deliver {
                mode: DeliveryMode::ResolveCapability,
                envelope,
            },
        )
    }

    #[test]
    fn test_both_formats_carry_envelopes() {
        let frame = sample_frame();
        for format in [SerializationFormat::Json, SerializationFormat::Bincode] {
            let codec = WireCodec::new(format);
            let bytes = codec.encode(&frame).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn test_format_mismatch_is_a_protocol_error() {
        let bytes = WireCodec::new(SerializationFormat::Bincode)
            .encode(&sample_frame())
            .unwrap();
        let err = WireCodec::new(SerializationFormat::Json)
            .decode(&bytes)
            .unwrap_err();
        assert_eq!(err.category(), "protocol");
    }
}
