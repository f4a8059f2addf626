//! Peer management module

pub mod table;

pub use table::{PeerOrigin, PeerParams, PeerRecord, PeerTable};
