//! Event dispatch
//!
//! Link and session triggers are fanned out to subscribed handlers
//! synchronously, on the thread that raised them, in registration order.
//! A handler that returns an error or panics is logged and skipped; the
//! remaining handlers still run.

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::{Destination, MacAddress, Mode, PacketKind};

/// An event raised by the link layer or a session
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A packet was decoded from the radio.
    PacketReceived {
        source: MacAddress,
        destination: Destination,
        kind: PacketKind,
        payload: Bytes,
    },

    /// A packet left the radio.
    PacketSent {
        destination: Destination,
        kind: PacketKind,
        payload: Bytes,
    },

    /// A peer was added to the table, explicitly or by discovery.
    NewPeer { address: MacAddress },

    /// A peer was removed from the table, explicitly or by eviction.
    PeerRemoved { address: MacAddress },

    /// A packet arrived from a station that is not in the table and
    /// auto-discovery is off.
    UnknownPeer { address: MacAddress },

    /// A session started capturing or playing.
    SessionStart { session: String, mode: Mode },

    /// A session returned to idle from capturing or playing.
    SessionEnd { session: String, mode: Mode },

    /// A session entered the error state.
    SessionError {
        session: String,
        /// Short machine-readable code, e.g. `microphone` or `decode`
        code: String,
        message: String,
    },

    /// A session recovered from the error state.
    SessionIdle { session: String },
}

/// Discriminant used to subscribe to a class of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PacketReceived,
    PacketSent,
    NewPeer,
    PeerRemoved,
    UnknownPeer,
    SessionStart,
    SessionEnd,
    SessionError,
    SessionIdle,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PacketReceived { .. } => EventKind::PacketReceived,
            Event::PacketSent { .. } => EventKind::PacketSent,
            Event::NewPeer { .. } => EventKind::NewPeer,
            Event::PeerRemoved { .. } => EventKind::PeerRemoved,
            Event::UnknownPeer { .. } => EventKind::UnknownPeer,
            Event::SessionStart { .. } => EventKind::SessionStart,
            Event::SessionEnd { .. } => EventKind::SessionEnd,
            Event::SessionError { .. } => EventKind::SessionError,
            Event::SessionIdle { .. } => EventKind::SessionIdle,
        }
    }

    /// The session a session event belongs to
    pub fn session(&self) -> Option<&str> {
        match self {
            Event::SessionStart { session, .. }
            | Event::SessionEnd { session, .. }
            | Event::SessionError { session, .. }
            | Event::SessionIdle { session } => Some(session),
            _ => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

/// Synchronous observer registry
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns false if the subscription did not exist
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Deliver `event` to every handler subscribed to its kind
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        // Handlers may subscribe or emit themselves, so none run under the lock
        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.handler.clone())
            .collect();

        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("{:?} handler failed: {:#}", kind, e),
                Err(_) => tracing::error!("{:?} handler panicked", kind),
            }
        }
    }
}
