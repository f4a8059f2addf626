//! Simulated shared air
//!
//! Every [`SimulatedRadio`] created from one [`SimulatedAir`] hears the
//! others when tuned to the same channel. Broadcasts reach every other
//! station; unicasts reach only the addressed one. Each radio carries a
//! [`RadioProbe`] that records transmissions and can inject busy or failed
//! transmits, so tests can inspect a radio after the link layer owns it.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::constants::{DEFAULT_CHANNEL, MAX_CHANNEL, MIN_CHANNEL};
use crate::error::RadioError;
use crate::network::radio::{InboundQueue, Radio, RawFrame};
use crate::protocol::{Destination, MacAddress};

struct Station {
    address: MacAddress,
    channel: u8,
    inbound: Option<InboundQueue>,
}

/// Shared medium connecting simulated radios
#[derive(Clone, Default)]
pub struct SimulatedAir {
    stations: Arc<Mutex<Vec<Station>>>,
}

impl SimulatedAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a radio on this air, tuned to the default channel
    pub fn radio(&self, address: MacAddress) -> SimulatedRadio {
        self.stations.lock().push(Station {
            address,
            channel: DEFAULT_CHANNEL,
            inbound: None,
        });
        SimulatedRadio {
            air: self.clone(),
            address,
            channel: DEFAULT_CHANNEL,
            probe: RadioProbe::default(),
        }
    }

    /// Deliver raw bytes to one station as if `source` had sent them,
    /// regardless of channel. Returns false if nothing was queued.
    pub fn inject(&self, to: MacAddress, source: MacAddress, data: impl Into<Bytes>) -> bool {
        let stations = self.stations.lock();
        let data = data.into();
        stations
            .iter()
            .filter(|s| s.address == to)
            .filter_map(|s| s.inbound.as_ref())
            .map(|inbound| {
                inbound.deliver(RawFrame {
                    source,
                    data: data.clone(),
                })
            })
            .fold(false, |any, ok| any || ok)
    }

    fn propagate(&self, source: MacAddress, channel: u8, data: &[u8], destination: Destination) {
        let stations = self.stations.lock();
        let data = Bytes::copy_from_slice(data);
        for station in stations.iter() {
            if station.address == source || station.channel != channel {
                continue;
            }
            if let Destination::Unicast(addr) = destination {
                if addr != station.address {
                    continue;
                }
            }
            if let Some(inbound) = &station.inbound {
                inbound.deliver(RawFrame {
                    source,
                    data: data.clone(),
                });
            }
        }
    }

    fn update<F: FnMut(&mut Station)>(&self, address: MacAddress, mut f: F) {
        for station in self.stations.lock().iter_mut() {
            if station.address == address {
                f(station);
            }
        }
    }
}

/// One recorded transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub destination: Destination,
    pub channel: u8,
    pub data: Bytes,
}

#[derive(Default)]
struct ProbeState {
    transmitted: Vec<Transmission>,
    attempts: u32,
    busy_remaining: u32,
    fail_next: Option<String>,
}

/// Test handle onto a simulated radio
#[derive(Clone, Default)]
pub struct RadioProbe {
    inner: Arc<Mutex<ProbeState>>,
}

impl RadioProbe {
    /// Frames that actually went on the air
    pub fn transmitted(&self) -> Vec<Transmission> {
        self.inner.lock().transmitted.clone()
    }

    /// Transmit calls, including rejected ones
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Report busy for the next `count` transmit calls
    pub fn set_busy(&self, count: u32) {
        self.inner.lock().busy_remaining = count;
    }

    /// Fail the next transmit with an I/O error
    pub fn fail_next(&self, message: impl Into<String>) {
        self.inner.lock().fail_next = Some(message.into());
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.transmitted.clear();
        state.attempts = 0;
    }
}

pub struct SimulatedRadio {
    air: SimulatedAir,
    address: MacAddress,
    channel: u8,
    probe: RadioProbe,
}

impl SimulatedRadio {
    pub fn probe(&self) -> RadioProbe {
        self.probe.clone()
    }
}

impl Radio for SimulatedRadio {
    fn transmit(&mut self, frame: &[u8], destination: Destination) -> Result<(), RadioError> {
        {
            let mut state = self.probe.inner.lock();
            state.attempts += 1;
            if state.busy_remaining > 0 {
                state.busy_remaining -= 1;
                return Err(RadioError::Busy);
            }
            if let Some(message) = state.fail_next.take() {
                return Err(RadioError::Io(message));
            }
            state.transmitted.push(Transmission {
                destination,
                channel: self.channel,
                data: Bytes::copy_from_slice(frame),
            });
        }
        self.air
            .propagate(self.address, self.channel, frame, destination);
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
            return Err(RadioError::UnsupportedChannel(channel));
        }
        self.channel = channel;
        self.air.update(self.address, |s| s.channel = channel);
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.channel
    }

    fn local_address(&self) -> MacAddress {
        self.address
    }

    fn attach(&mut self, inbound: InboundQueue) -> Result<(), RadioError> {
        let mut slot = Some(inbound);
        self.air.update(self.address, |s| s.inbound = slot.take());
        Ok(())
    }
}
