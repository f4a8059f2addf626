//! Radio driver seam
//!
//! The link layer owns exactly one [`Radio`]. Drivers deliver received frames
//! through an [`InboundQueue`], which never blocks the caller: when the queue
//! is full the frame is dropped and counted.

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::RadioError;
use crate::protocol::{Destination, MacAddress};

/// A frame as received from the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Transmitting station, reported by the radio
    pub source: MacAddress,
    /// Encoded packet
    pub data: Bytes,
}

/// Non-blocking handle drivers use to hand frames to the link layer
#[derive(Clone)]
pub struct InboundQueue {
    tx: Sender<RawFrame>,
    dropped: Arc<AtomicU64>,
}

impl InboundQueue {
    pub fn new(tx: Sender<RawFrame>, dropped: Arc<AtomicU64>) -> Self {
        Self { tx, dropped }
    }

    /// Queue a frame. Returns false if it was dropped.
    pub fn deliver(&self, frame: RawFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Inbound queue full, dropping frame from {}", frame.source);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// An ESP-NOW style radio
pub trait Radio: Send {
    /// Transmit one encoded packet. [`RadioError::Busy`] is transient and
    /// retried by the link layer.
    fn transmit(&mut self, frame: &[u8], destination: Destination) -> Result<(), RadioError>;

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError>;

    fn channel(&self) -> u8;

    fn local_address(&self) -> MacAddress;

    /// Start delivering received frames into `inbound`
    fn attach(&mut self, inbound: InboundQueue) -> Result<(), RadioError>;
}
