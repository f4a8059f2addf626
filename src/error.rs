//! Error types for the messaging and intercom core

use thiserror::Error;

use crate::protocol::{MacAddress, Mode};

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid parameters, detected before the node starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid radio channel: {0} (expected 1-14)")]
    InvalidChannel(u8),

    #[error("Invalid noise suppression level: {0} (expected 0-4)")]
    InvalidNoiseSuppression(u8),

    #[error("Invalid auto gain: {0} dBFS (expected 0-31)")]
    InvalidAutoGain(u8),

    #[error("Invalid volume multiplier: {0} (must be > 0)")]
    InvalidVolume(f32),

    #[error("Session '{0}' sets a VAD threshold but has no microphone")]
    VadWithoutMicrophone(String),

    #[error("Session '{0}' is defined more than once")]
    DuplicateSession(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session '{session}' cannot enter {mode:?}: no device bound")]
    ModeUnsupported { session: String, mode: Mode },

    #[error("Device '{0}' is not registered")]
    UnknownDevice(String),

    #[error("Device '{0}' is bound to more than one session")]
    DeviceInUse(String),

    #[error("Peer {0} is listed more than once")]
    DuplicatePeer(MacAddress),

    #[error("{count} configured peers exceed the table capacity of {max}")]
    TooManyPeers { count: usize, max: usize },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid parameters for action '{name}': {reason}")]
    InvalidAction { name: String, reason: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Packet encode/decode errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Unknown packet type: {0:#04x}")]
    UnknownType(u8),
}

/// Outbound send failures, reported to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Peer unknown: {0}")]
    PeerUnknown(MacAddress),

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Radio busy after {attempts} attempts")]
    RadioBusy { attempts: u32 },

    #[error("Radio failure: {0}")]
    Radio(String),
}

/// Peer table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Peer already exists: {0}")]
    DuplicatePeer(MacAddress),

    #[error("Peer not found: {0}")]
    NotFound(MacAddress),

    #[error("Peer table full: {0} entries")]
    TableFull(usize),

    #[error("The broadcast address cannot be a peer")]
    BroadcastAddress,
}

/// Errors reported by a radio driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Transient; the link layer retries with backoff
    #[error("Radio busy")]
    Busy,

    #[error("Channel not supported by radio: {0}")]
    UnsupportedChannel(u8),

    #[error("Radio I/O error: {0}")]
    Io(String),
}

/// Microphone / speaker failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Microphone error: {0}")]
    Microphone(String),

    #[error("Speaker error: {0}")]
    Speaker(String),
}

impl DeviceError {
    /// Short machine-readable code carried by the session error event
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::Microphone(_) => "microphone",
            DeviceError::Speaker(_) => "speaker",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DeviceError::Microphone(msg) | DeviceError::Speaker(msg) => msg,
        }
    }
}

/// Session-level runtime errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session '{session}' cannot enter {mode:?}: no device bound")]
    ModeUnsupported { session: String, mode: Mode },
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
