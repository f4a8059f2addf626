//! Node runtime
//!
//! Wires the link layer, intercom sessions and automations together. All
//! mutation goes through [`Node::apply_action`]. Event handlers installed
//! for automations only queue actions; the queue is drained at the end of
//! each [`Node::poll`], so handlers never re-enter the node.

use crossbeam::queue::ArrayQueue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::actions::{Action, ActionRegistry, Automation, Condition};
use crate::audio::device::{MicrophoneSource, SpeakerSink};
use crate::badge::{badge_id, is_valid_badge_id};
use crate::codec::{self, Packet};
use crate::config::AppConfig;
use crate::error::{ConfigError, Error};
use crate::events::{EventBus, SubscriptionId};
use crate::network::link::{InboundPacket, LinkLayer};
use crate::network::radio::Radio;
use crate::peers::PeerParams;
use crate::protocol::{ControlMessage, Destination, MacAddress, PacketKind};
use crate::session::Session;

/// Automation actions waiting to run
const ACTION_QUEUE_CAPACITY: usize = 64;

/// An action raised by an automation, with the condition guarding it
#[derive(Debug, Clone)]
struct PendingAction {
    action: Action,
    condition: Option<Condition>,
}

pub struct NodeBuilder {
    config: AppConfig,
    registry: ActionRegistry,
    events: Arc<EventBus>,
    microphones: HashMap<String, Box<dyn MicrophoneSource>>,
    speakers: HashMap<String, Box<dyn SpeakerSink>>,
}

impl NodeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: ActionRegistry::default(),
            events: Arc::new(EventBus::new()),
            microphones: HashMap::new(),
            speakers: HashMap::new(),
        }
    }

    /// Register a microphone under the id sessions refer to
    pub fn with_microphone(
        mut self,
        id: impl Into<String>,
        device: impl MicrophoneSource + 'static,
    ) -> Self {
        self.microphones.insert(id.into(), Box::new(device));
        self
    }

    /// Register a speaker under the id sessions refer to
    pub fn with_speaker(mut self, id: impl Into<String>, device: impl SpeakerSink + 'static) -> Self {
        self.speakers.insert(id.into(), Box::new(device));
        self
    }

    /// Use a registry with additional actions
    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Event bus the node will use; subscribe here to observe startup events
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn build(mut self, radio: Box<dyn Radio>) -> Result<Node, Error> {
        self.config.validate()?;
        let automations = self.config.automations(&self.registry)?;

        let link = Arc::new(LinkLayer::new(
            radio,
            self.config.link.options(),
            self.events.clone(),
        )?);

        for peer in &self.config.link.peers {
            link.add_configured_peer(
                peer.address,
                PeerParams {
                    channel: peer.channel,
                },
            )?;
        }

        let mut sessions = Vec::with_capacity(self.config.sessions.len());
        for session in &self.config.sessions {
            let microphone = match &session.microphone {
                Some(id) => Some(
                    self.microphones
                        .remove(id)
                        .ok_or_else(|| ConfigError::UnknownDevice(id.clone()))?,
                ),
                None => None,
            };
            let speaker = match &session.speaker {
                Some(id) => Some(
                    self.speakers
                        .remove(id)
                        .ok_or_else(|| ConfigError::UnknownDevice(id.clone()))?,
                ),
                None => None,
            };
            sessions.push(Session::new(
                session.name.clone(),
                session.params()?,
                link.clone(),
                microphone,
                speaker,
            )?);
        }

        let pending = Arc::new(ArrayQueue::new(ACTION_QUEUE_CAPACITY));
        let subscriptions = automations
            .into_iter()
            .map(|automation| install(&self.events, &pending, automation))
            .collect();

        let badge = badge_id(&link.local_address());
        tracing::info!(
            "Node {} ready: badge {}, {} session(s)",
            link.local_address(),
            badge,
            sessions.len()
        );

        Ok(Node {
            link,
            events: self.events,
            sessions,
            pending,
            subscriptions,
            badge,
            heartbeat: self.config.link.heartbeat(),
            last_heartbeat: None,
            peer_timeout: self.config.link.peer_timeout(),
        })
    }
}

fn install(
    events: &EventBus,
    pending: &Arc<ArrayQueue<PendingAction>>,
    automation: Automation,
) -> SubscriptionId {
    let queue = pending.clone();
    let Automation {
        on,
        session,
        condition,
        action,
    } = automation;

    events.subscribe(on, move |event| {
        if let Some(filter) = &session {
            if event.session() != Some(filter.as_str()) {
                return Ok(());
            }
        }
        queue
            .push(PendingAction {
                action: action.clone(),
                condition: condition.clone(),
            })
            .map_err(|_| anyhow::anyhow!("action queue full, dropping {:?}", action))
    })
}

pub struct Node {
    link: Arc<LinkLayer>,
    events: Arc<EventBus>,
    sessions: Vec<Session>,
    pending: Arc<ArrayQueue<PendingAction>>,
    subscriptions: Vec<SubscriptionId>,
    badge: String,
    heartbeat: Option<Duration>,
    last_heartbeat: Option<Instant>,
    peer_timeout: Duration,
}

impl Node {
    pub fn link(&self) -> &Arc<LinkLayer> {
        &self.link
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn badge(&self) -> &str {
        &self.badge
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    fn session_mut(&mut self, name: &str) -> Result<&mut Session, ConfigError> {
        self.sessions
            .iter_mut()
            .find(|s| s.name() == name)
            .ok_or_else(|| ConfigError::UnknownSession(name.to_string()))
    }

    /// Apply one action
    pub fn apply_action(&mut self, action: &Action, now: Instant) -> Result<(), Error> {
        tracing::debug!("Applying {:?}", action);
        match action {
            Action::SetMode { session, mode } => self.session_mut(session)?.set_mode(*mode, now)?,
            Action::ResetSession { session } => self.session_mut(session)?.reset(now),
            Action::SetTarget { session, target } => self.session_mut(session)?.set_target(*target),
            Action::SetBroadcastAllowed { session, allowed } => {
                self.session_mut(session)?.set_broadcast_allowed(*allowed)
            }
            Action::Send {
                destination,
                payload,
            } => self.link.send(*destination, payload)?,
            Action::AddPeer { address, params } => self.link.add_peer(*address, *params)?,
            Action::DeletePeer { address } => self.link.remove_peer(*address)?,
            Action::SetChannel { channel } => self.link.set_channel(*channel)?,
        }
        Ok(())
    }

    /// Evaluate a condition
    pub fn check(&self, condition: &Condition) -> Result<bool, ConfigError> {
        match condition {
            Condition::IsMode { session, mode } => self
                .session(session)
                .map(|s| s.is_in_mode(*mode))
                .ok_or_else(|| ConfigError::UnknownSession(session.clone())),
        }
    }

    /// One service step: receive, route, pace sessions, heartbeat, expire
    /// peers, then run queued automation actions
    pub fn poll(&mut self, now: Instant) -> Vec<InboundPacket> {
        let received = self.link.poll(now);
        for inbound in &received {
            self.route(inbound, now);
        }

        for session in &mut self.sessions {
            session.tick(now);
        }

        self.heartbeat(now);
        self.link.expire_peers(now, self.peer_timeout);
        self.run_pending(now);
        received
    }

    fn route(&mut self, inbound: &InboundPacket, now: Instant) {
        let Packet {
            kind,
            destination,
            payload,
        } = &inbound.packet;

        if let Destination::Unicast(address) = destination {
            if *address != self.link.local_address() {
                return;
            }
        }

        match kind {
            PacketKind::Audio => match codec::decode_audio(payload) {
                Ok(frame) => {
                    for session in &mut self.sessions {
                        session.handle_audio(inbound.source, frame.clone(), now);
                    }
                }
                Err(e) => {
                    tracing::warn!("Bad audio frame from {}: {}", inbound.source, e);
                    for session in &mut self.sessions {
                        session.handle_decode_error(inbound.source, &e, now);
                    }
                }
            },
            PacketKind::Control => match codec::decode_control(payload) {
                Ok(message) => self.handle_control(inbound.source, message),
                Err(e) => tracing::warn!("Bad control message from {}: {}", inbound.source, e),
            },
            PacketKind::Data => {}
        }
    }

    fn handle_control(&self, source: MacAddress, message: ControlMessage) {
        match message {
            ControlMessage::Ping { badge } => {
                if !is_valid_badge_id(&badge) {
                    tracing::warn!("Ping from {} with invalid badge {:?}", source, badge);
                    return;
                }
                let destination = if self.link.peers().contains(&source) {
                    Destination::Unicast(source)
                } else {
                    Destination::Broadcast
                };
                let reply = ControlMessage::Pong {
                    badge: self.badge.clone(),
                };
                self.send_control(destination, &reply);
            }
            ControlMessage::Pong { badge } => {
                tracing::debug!("Pong from {} (badge {})", source, badge);
            }
        }
    }

    fn send_control(&self, destination: Destination, message: &ControlMessage) {
        let result = codec::encode_control(message)
            .map_err(Error::from)
            .and_then(|payload| {
                self.link
                    .send_packet(PacketKind::Control, destination, &payload)
                    .map_err(Error::from)
            });
        if let Err(e) = result {
            tracing::warn!("Control message to {} failed: {}", destination, e);
        }
    }

    fn heartbeat(&mut self, now: Instant) {
        let Some(interval) = self.heartbeat else {
            return;
        };
        let due = self
            .last_heartbeat
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            self.last_heartbeat = Some(now);
            let ping = ControlMessage::Ping {
                badge: self.badge.clone(),
            };
            self.send_control(Destination::Broadcast, &ping);
        }
    }

    fn run_pending(&mut self, now: Instant) {
        // Actions may raise events that queue more actions; those wait for the
        // next poll
        for _ in 0..self.pending.len() {
            let Some(pending) = self.pending.pop() else {
                break;
            };
            if let Some(condition) = &pending.condition {
                match self.check(condition) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::warn!("Condition failed: {}", e);
                        continue;
                    }
                }
            }
            if let Err(e) = self.apply_action(&pending.action, now) {
                tracing::warn!("Automation action {:?} failed: {}", pending.action, e);
            }
        }
    }

    /// Actions waiting for the next poll
    pub fn pending_actions(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.events.unsubscribe(id);
        }
    }
}
