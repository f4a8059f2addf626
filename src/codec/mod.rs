//! Wire codecs
//!
//! The packet codec frames every radio transmission; the audio and control
//! codecs define the payloads carried by `Audio` and `Control` packets.

pub mod audio;
pub mod control;
pub mod packet;

pub use audio::{decode_audio, encode_audio, FrameFlags, MAX_FRAME_SAMPLES};
pub use control::{decode_control, encode_control};
pub use packet::{decode, encode, Packet};
