//! Peer table
//!
//! Known remote stations keyed by address. The table is bounded; auto
//! discovery evicts the least recently seen discovered peer when it is full,
//! while explicit additions fail instead.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::error::PeerError;
use crate::protocol::MacAddress;

/// How a peer entered the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOrigin {
    /// Listed in the configuration
    Configured,
    /// Added at runtime by an action or API call
    Explicit,
    /// Learned from an inbound packet
    Discovered,
}

/// Per-peer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerParams {
    /// Channel override; the link channel is used when absent
    pub channel: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub address: MacAddress,
    pub params: PeerParams,
    pub origin: PeerOrigin,
    /// Wall-clock time the peer was added
    pub added_at: DateTime<Utc>,
    /// Last time a packet was received from the peer
    pub last_seen: Instant,
    /// False once the peer has been silent longer than the peer timeout
    pub alive: bool,
}

pub struct PeerTable {
    peers: DashMap<MacAddress, PeerRecord>,
    max_peers: usize,
    /// Serializes structural changes so the capacity check holds
    structure: Mutex<()>,
}

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: DashMap::new(),
            max_peers,
            structure: Mutex::new(()),
        }
    }

    /// Add a peer explicitly
    pub fn add_peer(&self, address: MacAddress, params: PeerParams) -> Result<(), PeerError> {
        self.insert(address, params, PeerOrigin::Explicit, Instant::now())
    }

    /// Add a peer from the configuration
    pub fn add_configured(
        &self,
        address: MacAddress,
        params: PeerParams,
    ) -> Result<(), PeerError> {
        self.insert(address, params, PeerOrigin::Configured, Instant::now())
    }

    fn insert(
        &self,
        address: MacAddress,
        params: PeerParams,
        origin: PeerOrigin,
        now: Instant,
    ) -> Result<(), PeerError> {
        if address.is_broadcast() {
            return Err(PeerError::BroadcastAddress);
        }
        let _guard = self.structure.lock();
        if self.peers.contains_key(&address) {
            return Err(PeerError::DuplicatePeer(address));
        }
        if self.peers.len() >= self.max_peers {
            return Err(PeerError::TableFull(self.max_peers));
        }
        self.peers.insert(address, Self::record(address, params, origin, now));
        tracing::debug!("Peer {} added ({:?})", address, origin);
        Ok(())
    }

    fn record(
        address: MacAddress,
        params: PeerParams,
        origin: PeerOrigin,
        now: Instant,
    ) -> PeerRecord {
        PeerRecord {
            address,
            params,
            origin,
            added_at: Utc::now(),
            last_seen: now,
            alive: true,
        }
    }

    /// Learn a peer from an inbound packet. When the table is full the least
    /// recently seen discovered peer is evicted and its address returned.
    pub fn discover(
        &self,
        address: MacAddress,
        now: Instant,
    ) -> Result<Option<MacAddress>, PeerError> {
        if address.is_broadcast() {
            return Err(PeerError::BroadcastAddress);
        }
        let _guard = self.structure.lock();
        if self.peers.contains_key(&address) {
            return Err(PeerError::DuplicatePeer(address));
        }

        let mut evicted = None;
        if self.peers.len() >= self.max_peers {
            let victim = self
                .peers
                .iter()
                .filter(|entry| entry.origin == PeerOrigin::Discovered)
                .min_by_key(|entry| entry.last_seen)
                .map(|entry| entry.address)
                .ok_or(PeerError::TableFull(self.max_peers))?;
            self.peers.remove(&victim);
            tracing::debug!("Peer {} evicted to make room for {}", victim, address);
            evicted = Some(victim);
        }

        self.peers.insert(
            address,
            Self::record(address, PeerParams::default(), PeerOrigin::Discovered, now),
        );
        Ok(evicted)
    }

    pub fn remove_peer(&self, address: &MacAddress) -> Result<PeerRecord, PeerError> {
        let _guard = self.structure.lock();
        self.peers
            .remove(address)
            .map(|(_, record)| record)
            .ok_or(PeerError::NotFound(*address))
    }

    pub fn lookup(&self, address: &MacAddress) -> Option<PeerRecord> {
        self.peers.get(address).map(|entry| entry.clone())
    }

    pub fn contains(&self, address: &MacAddress) -> bool {
        self.peers.contains_key(address)
    }

    /// Peers currently considered alive, ordered by address
    pub fn list_active(&self) -> Vec<PeerRecord> {
        let mut active: Vec<PeerRecord> = self
            .peers
            .iter()
            .filter(|entry| entry.alive)
            .map(|entry| entry.clone())
            .collect();
        active.sort_by_key(|record| record.address);
        active
    }

    /// Every peer, ordered by address
    pub fn list(&self) -> Vec<PeerRecord> {
        let mut all: Vec<PeerRecord> = self.peers.iter().map(|entry| entry.clone()).collect();
        all.sort_by_key(|record| record.address);
        all
    }

    /// Record traffic from a peer. Returns false if the peer is unknown.
    pub fn touch(&self, address: &MacAddress, now: Instant) -> bool {
        match self.peers.get_mut(address) {
            Some(mut entry) => {
                if !entry.alive {
                    tracing::info!("Peer {} is back", address);
                }
                entry.last_seen = now;
                entry.alive = true;
                true
            }
            None => false,
        }
    }

    /// Mark peers silent for longer than `timeout` as not alive. Returns the
    /// peers that changed state.
    pub fn expire(&self, now: Instant, timeout: Duration) -> Vec<MacAddress> {
        let mut expired = Vec::new();
        for mut entry in self.peers.iter_mut() {
            if entry.alive && now.saturating_duration_since(entry.last_seen) > timeout {
                entry.alive = false;
                expired.push(entry.address);
            }
        }
        expired.sort();
        expired
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_peers
    }
}
