//! Control message payload (bincode)

use bytes::Bytes;

use crate::constants::MAX_PAYLOAD;
use crate::error::CodecError;
use crate::protocol::ControlMessage;

pub fn encode_control(message: &ControlMessage) -> Result<Bytes, CodecError> {
    let encoded =
        bincode::serialize(message).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if encoded.len() > MAX_PAYLOAD {
        return Err(CodecError::TooLarge {
            len: encoded.len(),
            max: MAX_PAYLOAD,
        });
    }
    Ok(Bytes::from(encoded))
}

pub fn decode_control(payload: &[u8]) -> Result<ControlMessage, CodecError> {
    bincode::deserialize(payload).map_err(|e| CodecError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_roundtrip() {
        let msg = ControlMessage::Ping {
            badge: "0aB3xYz1".to_string(),
        };
        let bytes = encode_control(&msg).unwrap();
        assert_eq!(decode_control(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            decode_control(&[0xFF, 0xFF, 0xFF, 0xFF]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_badge_rejected() {
        let msg = ControlMessage::Pong {
            badge: "x".repeat(MAX_PAYLOAD),
        };
        assert!(matches!(encode_control(&msg), Err(CodecError::TooLarge { .. })));
    }
}
