//! Packet framing
//!
//! Every radio transmission is one packet. Numeric fields are big-endian.
//!
//! ```text
//! ┌──────────┬──────────┬──────────────────┬─────────────┬─────────────────┐
//! │ Byte 0   │ Byte 1   │ Byte 2-7         │ Byte 8-9    │ Byte 10..N      │
//! │ Version  │ Kind     │ Destination MAC  │ Length      │ Payload         │
//! │ (0x01)   │ (uint8)  │ (FF..FF = bcast) │ (uint16 BE) │ (up to 240 B)   │
//! └──────────┴──────────┴──────────────────┴─────────────┴─────────────────┘
//! ```
//!
//! The source address is not part of the packet; the radio reports it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{MAX_PAYLOAD, PACKET_HEADER_LEN, PROTOCOL_VERSION};
use crate::error::CodecError;
use crate::protocol::{Destination, MacAddress, PacketKind};

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub destination: Destination,
    pub payload: Bytes,
}

/// Encode a packet. Payloads longer than [`MAX_PAYLOAD`] are rejected, as is
/// a unicast to the broadcast address, which would decode as a broadcast.
pub fn encode(
    kind: PacketKind,
    destination: Destination,
    payload: &[u8],
) -> Result<Bytes, CodecError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(CodecError::TooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    if destination == Destination::Unicast(MacAddress::BROADCAST) {
        return Err(CodecError::Malformed(
            "unicast to the broadcast address".into(),
        ));
    }

    let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + payload.len());
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(kind.as_u8());
    buf.put_slice(&destination.address().octets());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode a packet received from the radio
pub fn decode(data: &[u8]) -> Result<Packet, CodecError> {
    if data.len() < PACKET_HEADER_LEN {
        return Err(CodecError::Malformed(format!(
            "{} bytes is shorter than the {}-byte header",
            data.len(),
            PACKET_HEADER_LEN
        )));
    }

    let mut buf = data;
    let version = buf.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(CodecError::Malformed(format!(
            "unsupported protocol version {:#04x}",
            version
        )));
    }

    let tag = buf.get_u8();
    let kind = PacketKind::from_u8(tag).ok_or(CodecError::UnknownType(tag))?;

    let mut mac = [0u8; 6];
    buf.copy_to_slice(&mut mac);
    let destination = Destination::from(MacAddress::new(mac));

    let len = buf.get_u16() as usize;
    if len > MAX_PAYLOAD {
        return Err(CodecError::TooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    if buf.remaining() != len {
        return Err(CodecError::Malformed(format!(
            "declared {} payload bytes, found {}",
            len,
            buf.remaining()
        )));
    }

    Ok(Packet {
        kind,
        destination,
        payload: Bytes::copy_from_slice(buf),
    })
}
