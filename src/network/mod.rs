//! Network subsystem: radio drivers and the link layer

pub mod link;
pub mod radio;
pub mod sim;
#[cfg(feature = "udp-radio")]
pub mod udp;

pub use link::{InboundPacket, LinkLayer, LinkOptions, LinkStats};
pub use radio::{InboundQueue, Radio, RawFrame};
pub use sim::{RadioProbe, SimulatedAir, SimulatedRadio, Transmission};
#[cfg(feature = "udp-radio")]
pub use udp::UdpRadio;
