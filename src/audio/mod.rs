//! Audio subsystem module

pub mod bridge;
pub mod buffer;
pub mod device;

pub use bridge::{AudioBridge, BridgeParams, NoiseSuppression};
pub use buffer::{AudioFrame, JitterBuffer, JitterBufferStats};
pub use device::{BufferSink, BufferSource, MeterSink, MicrophoneSource, SpeakerSink, ToneSource};
