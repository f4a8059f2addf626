//! Link layer
//!
//! Owns the single radio and the peer table. Outbound packets are encoded,
//! checked against the peer table and transmitted with at most one
//! transmission in flight; a busy radio is retried with exponential backoff.
//! Inbound frames queued by the driver are drained by [`LinkLayer::poll`],
//! decoded, reflected in the peer table and dispatched to listeners and the
//! event bus.

use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::{self, Packet};
use crate::constants::*;
use crate::error::{ConfigError, Error, PeerError, RadioError, SendError};
use crate::events::{Event, EventBus};
use crate::network::radio::{InboundQueue, Radio, RawFrame};
use crate::peers::{PeerParams, PeerTable};
use crate::protocol::{Destination, MacAddress, PacketKind};

/// Runtime link parameters
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Radio channel, 1-14
    pub channel: u8,
    /// Add unknown peers automatically, on send and on receive
    pub auto_new_peer: bool,
    pub max_peers: usize,
    /// Transmit attempts while the radio reports busy
    pub send_retries: u32,
    /// Delay before the first retry; doubled on each further retry
    pub retry_backoff: Duration,
    /// How long a send waits for another transmission to finish
    pub acquire_timeout: Duration,
    /// Inbound frames held between polls
    pub inbound_queue: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            auto_new_peer: false,
            max_peers: DEFAULT_MAX_PEERS,
            send_retries: DEFAULT_SEND_RETRIES,
            retry_backoff: Duration::from_millis(2),
            acquire_timeout: Duration::from_millis(50),
            inbound_queue: DEFAULT_INBOUND_QUEUE,
        }
    }
}

pub fn validate_channel(channel: u8) -> Result<(), ConfigError> {
    if (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
        Ok(())
    } else {
        Err(ConfigError::InvalidChannel(channel))
    }
}

/// A decoded packet with the station that sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub source: MacAddress,
    pub packet: Packet,
}

/// Link counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub send_failures: u64,
    pub busy_retries: u64,
    pub decode_errors: u64,
    pub inbound_dropped: u64,
}

type Listener = Arc<dyn Fn(&InboundPacket) + Send + Sync>;

pub struct LinkLayer {
    radio: Mutex<Box<dyn Radio>>,
    peers: PeerTable,
    events: Arc<EventBus>,
    inbound_rx: Receiver<RawFrame>,
    listeners: RwLock<Vec<Listener>>,
    options: LinkOptions,
    local_address: MacAddress,
    channel: AtomicU8,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_failures: AtomicU64,
    busy_retries: AtomicU64,
    decode_errors: AtomicU64,
    inbound_dropped: Arc<AtomicU64>,
}

impl LinkLayer {
    /// Take ownership of `radio`, tune it and start receiving
    pub fn new(
        mut radio: Box<dyn Radio>,
        options: LinkOptions,
        events: Arc<EventBus>,
    ) -> Result<Self, Error> {
        validate_channel(options.channel)?;
        radio.set_channel(options.channel)?;

        let (tx, inbound_rx) = bounded(options.inbound_queue.max(1));
        let inbound_dropped = Arc::new(AtomicU64::new(0));
        radio.attach(InboundQueue::new(tx, inbound_dropped.clone()))?;

        let local_address = radio.local_address();
        tracing::info!(
            "Link up: {} on channel {} (auto_new_peer={})",
            local_address,
            options.channel,
            options.auto_new_peer
        );

        Ok(Self {
            radio: Mutex::new(radio),
            peers: PeerTable::new(options.max_peers),
            events,
            inbound_rx,
            listeners: RwLock::new(Vec::new()),
            channel: AtomicU8::new(options.channel),
            options,
            local_address,
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            busy_retries: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            inbound_dropped,
        })
    }

    pub fn local_address(&self) -> MacAddress {
        self.local_address
    }

    pub fn channel(&self) -> u8 {
        self.channel.load(Ordering::Relaxed)
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Retune the radio
    pub fn set_channel(&self, channel: u8) -> Result<(), Error> {
        validate_channel(channel)?;
        self.radio.lock().set_channel(channel)?;
        self.channel.store(channel, Ordering::Relaxed);
        tracing::info!("Switched to channel {}", channel);
        Ok(())
    }

    /// Send a data packet
    pub fn send(&self, destination: Destination, payload: &[u8]) -> Result<(), SendError> {
        self.send_packet(PacketKind::Data, destination, payload)
    }

    /// Send a packet of any kind. A unicast to the broadcast address is sent
    /// as a broadcast.
    pub fn send_packet(
        &self,
        kind: PacketKind,
        destination: Destination,
        payload: &[u8],
    ) -> Result<(), SendError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(SendError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let destination = Destination::from(destination.address());
        let mut peer_channel = None;
        if let Destination::Unicast(address) = destination {
            self.ensure_peer(address)?;
            peer_channel = self.peers.lookup(&address).and_then(|peer| peer.params.channel);
        }

        let frame = codec::encode(kind, destination, payload).map_err(|_| {
            SendError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            }
        })?;

        if let Err(e) = self.transmit(&frame, destination, peer_channel) {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Send of {:?} to {} failed: {}", kind, destination, e);
            return Err(e);
        }

        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Sent {:?} ({} bytes) to {}", kind, payload.len(), destination);
        self.events.emit(&Event::PacketSent {
            destination,
            kind,
            payload: frame.slice(PACKET_HEADER_LEN..),
        });
        Ok(())
    }

    fn ensure_peer(&self, address: MacAddress) -> Result<(), SendError> {
        if self.peers.contains(&address) {
            return Ok(());
        }
        if !self.options.auto_new_peer {
            return Err(SendError::PeerUnknown(address));
        }
        match self.peers.discover(address, Instant::now()) {
            Ok(evicted) => {
                self.announce_discovery(address, evicted);
                Ok(())
            }
            // Added concurrently
            Err(PeerError::DuplicatePeer(_)) => Ok(()),
            Err(e) => {
                tracing::warn!("Cannot add peer {}: {}", address, e);
                Err(SendError::PeerUnknown(address))
            }
        }
    }

    fn announce_discovery(&self, address: MacAddress, evicted: Option<MacAddress>) {
        if let Some(evicted) = evicted {
            self.events.emit(&Event::PeerRemoved { address: evicted });
        }
        tracing::info!("New peer {}", address);
        self.events.emit(&Event::NewPeer { address });
    }

    /// Transmit on the link channel, or retune to `channel` for this one
    /// frame and back afterwards.
    fn transmit(
        &self,
        frame: &[u8],
        destination: Destination,
        channel: Option<u8>,
    ) -> Result<(), SendError> {
        let mut radio = self
            .radio
            .try_lock_for(self.options.acquire_timeout)
            .ok_or(SendError::RadioBusy { attempts: 0 })?;

        let home = radio.channel();
        let retune = channel.filter(|&c| c != home);
        if let Some(channel) = retune {
            radio
                .set_channel(channel)
                .map_err(|e| SendError::Radio(e.to_string()))?;
            tracing::trace!("Retuned to peer channel {}", channel);
        }

        let result = self.transmit_with_retries(&mut **radio, frame, destination);

        if retune.is_some() {
            if let Err(e) = radio.set_channel(home) {
                tracing::error!("Cannot return to channel {}: {}", home, e);
            }
        }
        result
    }

    /// Busy retries sleep on the calling thread with the radio held, so a
    /// frame-paced caller stalls for the summed backoff before the send fails.
    fn transmit_with_retries(
        &self,
        radio: &mut dyn Radio,
        frame: &[u8],
        destination: Destination,
    ) -> Result<(), SendError> {
        let attempts = self.options.send_retries.max(1);
        let mut backoff = self.options.retry_backoff;
        for attempt in 1..=attempts {
            match radio.transmit(frame, destination) {
                Ok(()) => return Ok(()),
                Err(RadioError::Busy) => {
                    if attempt == attempts {
                        break;
                    }
                    self.busy_retries.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Radio busy, retry {} in {:?}", attempt, backoff);
                    std::thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(SendError::Radio(e.to_string())),
            }
        }
        Err(SendError::RadioBusy { attempts })
    }

    /// Register a listener for every decoded inbound packet
    pub fn on_receive<F>(&self, listener: F)
    where
        F: Fn(&InboundPacket) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Drain and dispatch everything the radio has queued
    pub fn poll(&self, now: Instant) -> Vec<InboundPacket> {
        let mut received = Vec::new();
        while let Ok(raw) = self.inbound_rx.try_recv() {
            let packet = match codec::decode(&raw.data) {
                Ok(packet) => packet,
                Err(e) => {
                    self.decode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Dropping frame from {}: {}", raw.source, e);
                    continue;
                }
            };

            self.track_sender(raw.source, now);
            self.packets_received.fetch_add(1, Ordering::Relaxed);

            let inbound = InboundPacket {
                source: raw.source,
                packet,
            };
            let listeners: Vec<Listener> = self.listeners.read().clone();
            for listener in &listeners {
                listener(&inbound);
            }
            self.events.emit(&Event::PacketReceived {
                source: inbound.source,
                destination: inbound.packet.destination,
                kind: inbound.packet.kind,
                payload: inbound.packet.payload.clone(),
            });
            received.push(inbound);
        }
        received
    }

    fn track_sender(&self, source: MacAddress, now: Instant) {
        if self.peers.touch(&source, now) {
            return;
        }
        if !self.options.auto_new_peer {
            tracing::debug!("Packet from unknown peer {}", source);
            self.events.emit(&Event::UnknownPeer { address: source });
            return;
        }
        match self.peers.discover(source, now) {
            Ok(evicted) => self.announce_discovery(source, evicted),
            Err(e) => tracing::debug!("Not tracking {}: {}", source, e),
        }
    }

    pub fn add_peer(&self, address: MacAddress, params: PeerParams) -> Result<(), PeerError> {
        self.peers.add_peer(address, params)?;
        tracing::info!("Added peer {}", address);
        self.events.emit(&Event::NewPeer { address });
        Ok(())
    }

    /// Add a peer listed in the configuration
    pub fn add_configured_peer(
        &self,
        address: MacAddress,
        params: PeerParams,
    ) -> Result<(), PeerError> {
        self.peers.add_configured(address, params)?;
        self.events.emit(&Event::NewPeer { address });
        Ok(())
    }

    pub fn remove_peer(&self, address: MacAddress) -> Result<(), PeerError> {
        self.peers.remove_peer(&address)?;
        tracing::info!("Removed peer {}", address);
        self.events.emit(&Event::PeerRemoved { address });
        Ok(())
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Mark peers silent for longer than `timeout` as not alive
    pub fn expire_peers(&self, now: Instant, timeout: Duration) -> Vec<MacAddress> {
        let expired = self.peers.expire(now, timeout);
        for address in &expired {
            tracing::info!("Peer {} went silent", address);
        }
        expired
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            busy_retries: self.busy_retries.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            inbound_dropped: self.inbound_dropped.load(Ordering::Relaxed),
        }
    }
}
