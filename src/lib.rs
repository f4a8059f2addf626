//! # NowTalk Link
//!
//! Point-to-multipoint messaging, peer management and half-duplex intercom
//! over an ESP-NOW style broadcast radio.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                   NODE                                      │
//! │                                                                             │
//! │  ┌─────────────┐   ┌─────────────┐          ┌───────────────────────────┐   │
//! │  │ Microphone  │   │   Speaker   │          │  Automations (actions)    │   │
//! │  └──────┬──────┘   └──────▲──────┘          └─────────────▲─────────────┘   │
//! │         │                 │                               │                 │
//! │         ▼                 │                               │                 │
//! │  ┌─────────────────────────────────────┐     ┌────────────┴────────────┐    │
//! │  │   Session (session::Session)        │────▶│  Event Bus (events)     │    │
//! │  │   IDLE / CAPTURING / PLAYING / ERR  │     │  start/end/error/idle   │    │
//! │  │   ┌─────────────────────────────┐   │     │  received/sent/new peer │    │
//! │  │   │ Audio Bridge (audio)        │   │     └────────────▲────────────┘    │
//! │  │   │ frames, gain, jitter buffer │   │                  │                 │
//! │  │   └─────────────────────────────┘   │                  │                 │
//! │  └──────────────┬──────────▲───────────┘                  │                 │
//! │                 │          │                              │                 │
//! │                 ▼          │                              │                 │
//! │  ┌─────────────────────────┴───────────────────────────────┴─────────────┐  │
//! │  │              Link Layer (network::link) - Single Radio                │  │
//! │  │      Packets: [Version|Kind|Destination|Length|Payload]               │  │
//! │  │      Peer Table (peers)  ·  Codec (codec)  ·  bounded inbound queue   │  │
//! │  └───────────────────────────────────┬───────────────────────────────────┘  │
//! └──────────────────────────────────────┼──────────────────────────────────────┘
//!                                        │ radio (ESP-NOW, simulated air, UDP)
//!                                        ▼
//!                                 other stations
//! ```

pub mod actions;
pub mod audio;
pub mod badge;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod node;
pub mod peers;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Largest frame the radio carries in one transmission
    pub const RADIO_MTU: usize = 250;

    /// Packet header: version, kind, destination, payload length
    pub const PACKET_HEADER_LEN: usize = 10;

    /// Largest payload a single packet may carry
    pub const MAX_PAYLOAD: usize = RADIO_MTU - PACKET_HEADER_LEN;

    /// Wire protocol version
    pub const PROTOCOL_VERSION: u8 = 0x01;

    /// Intercom sample rate
    pub const SAMPLE_RATE_HZ: u32 = 16_000;

    /// Samples per audio frame (7 ms at 16 kHz, fits one packet)
    pub const FRAME_SAMPLES: usize = 112;

    /// Lowest valid radio channel
    pub const MIN_CHANNEL: u8 = 1;

    /// Highest valid radio channel
    pub const MAX_CHANNEL: u8 = 14;

    /// Channel used when the configuration does not name one
    pub const DEFAULT_CHANNEL: u8 = 1;

    /// Default peer table capacity
    pub const DEFAULT_MAX_PEERS: usize = 20;

    /// Default number of transmit attempts while the radio reports busy
    pub const DEFAULT_SEND_RETRIES: u32 = 5;

    /// Default inbound queue depth (frames)
    pub const DEFAULT_INBOUND_QUEUE: usize = 64;

    /// Jitter buffer slots (power of two)
    pub const JITTER_BUFFER_SLOTS: usize = 16;

    /// Default UDP port for the LAN radio emulation
    pub const DEFAULT_UDP_PORT: u16 = 47_000;
}
