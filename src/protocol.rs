//! Shared protocol types: station addresses, destinations, packet kinds,
//! intercom modes and control messages.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// 48-bit station address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Random unicast, locally administered address for emulated stations
    pub fn random_local() -> Self {
        let id = uuid::Uuid::new_v4();
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&id.as_bytes()[..6]);
        bytes[0] = (bytes[0] | 0x02) & !0x01;
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({})", self)
    }
}

impl FromStr for MacAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue(format!("bad MAC address '{}'", s));
        let mut bytes = [0u8; 6];
        let mut parts = s.split(|c: char| c == ':' || c == '-');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Where a packet is going. An absent destination is a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    #[default]
    Broadcast,
    Unicast(MacAddress),
}

impl Destination {
    /// Address as written on the wire
    pub fn address(&self) -> MacAddress {
        match self {
            Destination::Broadcast => MacAddress::BROADCAST,
            Destination::Unicast(mac) => *mac,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Destination::Broadcast)
    }
}

impl From<MacAddress> for Destination {
    fn from(mac: MacAddress) -> Self {
        if mac.is_broadcast() {
            Destination::Broadcast
        } else {
            Destination::Unicast(mac)
        }
    }
}

impl From<Option<MacAddress>> for Destination {
    fn from(mac: Option<MacAddress>) -> Self {
        mac.map(Destination::from).unwrap_or(Destination::Broadcast)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => f.write_str("broadcast"),
            Destination::Unicast(mac) => write!(f, "{}", mac),
        }
    }
}

/// Packet type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    /// Opaque application bytes
    Data,
    /// Intercom audio frame
    Audio,
    /// Link control message
    Control,
}

impl PacketKind {
    pub fn as_u8(self) -> u8 {
        match self {
            PacketKind::Data => 0x01,
            PacketKind::Audio => 0x02,
            PacketKind::Control => 0x03,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PacketKind::Data),
            0x02 => Some(PacketKind::Audio),
            0x03 => Some(PacketKind::Control),
            _ => None,
        }
    }
}

/// Requested intercom mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    #[default]
    None,
    Microphone,
    Speaker,
}

/// Messages carried by control packets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Liveness probe; carries the sender's badge ID
    Ping { badge: String },
    /// Reply to a ping
    Pong { badge: String },
}
