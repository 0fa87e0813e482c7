//! Wire codec between [`GatewayPayload`] and stream frames.

use super::protocol::GatewayPayload;
use thiserror::Error;

/// Codec failures. Decode errors are connection-scoped, never fatal.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to decode gateway frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode gateway payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encodes outbound commands and decodes inbound frames.
pub trait Codec: Send + Sync {
    fn encode(&self, payload: &GatewayPayload) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, frame: &[u8]) -> Result<GatewayPayload, CodecError>;

    /// Value of the `encoding` query parameter this codec speaks.
    fn encoding(&self) -> &'static str;
}

/// JSON text frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, payload: &GatewayPayload) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(payload).map_err(CodecError::Encode)
    }

    fn decode(&self, frame: &[u8]) -> Result<GatewayPayload, CodecError> {
        serde_json::from_slice(frame).map_err(CodecError::Decode)
    }

    fn encoding(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::protocol::{build_identify, opcode, IdentifyProperties};

    #[test]
    fn dispatch_roundtrip() {
        let codec = JsonCodec;
        let payload = GatewayPayload::dispatch(
            "GUILD_CREATE",
            12,
            serde_json::json!({"id": "1", "name": "Dune", "member_count": 3}),
        );
        let bytes = codec.encode(&payload).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn command_roundtrip() {
        let codec = JsonCodec;
        let payload = build_identify("t", &IdentifyProperties::default(), [0, 1], 513);
        let bytes = codec.encode(&payload).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.op, opcode::IDENTIFY);
    }

    #[test]
    fn malformed_frame_is_a_decode_error() {
        let err = JsonCodec.decode(b"\x83h\x02").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));

        let err = JsonCodec.decode(br#"{"d": 1}"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
