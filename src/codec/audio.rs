//! Audio frame payload
//!
//! ```text
//! ┌─────────────┬──────────┬──────────────────────────────┐
//! │ Byte 0-1    │ Byte 2   │ Byte 3..N                    │
//! │ Sequence    │ Flags    │ Samples (int16 BE, mono)     │
//! └─────────────┴──────────┴──────────────────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::audio::buffer::AudioFrame;
use crate::constants::MAX_PAYLOAD;
use crate::error::CodecError;

/// Sequence number plus flags
pub const AUDIO_HEADER_LEN: usize = 3;

/// Most samples one packet can carry
pub const MAX_FRAME_SAMPLES: usize = (MAX_PAYLOAD - AUDIO_HEADER_LEN) / 2;

/// Audio frame flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const START: u8 = 0x01;
    pub const END: u8 = 0x02;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn with_start(self) -> Self {
        Self(self.0 | Self::START)
    }

    pub fn with_end(self) -> Self {
        Self(self.0 | Self::END)
    }

    pub fn is_start(self) -> bool {
        self.0 & Self::START != 0
    }

    pub fn is_end(self) -> bool {
        self.0 & Self::END != 0
    }
}

/// Serialize a frame into an `Audio` packet payload
pub fn encode_audio(frame: &AudioFrame) -> Result<Bytes, CodecError> {
    if frame.samples.len() > MAX_FRAME_SAMPLES {
        return Err(CodecError::TooLarge {
            len: AUDIO_HEADER_LEN + frame.samples.len() * 2,
            max: MAX_PAYLOAD,
        });
    }

    let mut buf = BytesMut::with_capacity(AUDIO_HEADER_LEN + frame.samples.len() * 2);
    buf.put_u16(frame.sequence);
    buf.put_u8(frame.flags.bits());
    for sample in &frame.samples {
        buf.put_i16(*sample);
    }
    Ok(buf.freeze())
}

/// Parse an `Audio` packet payload
pub fn decode_audio(payload: &[u8]) -> Result<AudioFrame, CodecError> {
    if payload.len() < AUDIO_HEADER_LEN {
        return Err(CodecError::Malformed(format!(
            "audio payload of {} bytes has no frame header",
            payload.len()
        )));
    }

    let mut buf = payload;
    let sequence = buf.get_u16();
    let flags = FrameFlags::from_bits(buf.get_u8());

    if buf.remaining() % 2 != 0 {
        return Err(CodecError::Malformed(format!(
            "odd sample byte count {}",
            buf.remaining()
        )));
    }

    let mut samples = Vec::with_capacity(buf.remaining() / 2);
    while buf.has_remaining() {
        samples.push(buf.get_i16());
    }

    Ok(AudioFrame::new(samples, sequence, flags))
}
