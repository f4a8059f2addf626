//! Actions and conditions
//!
//! The closed set of operations automations can trigger, plus a
//! registration table that turns an action name and JSON parameters into a
//! typed [`Action`].
//!
//! | name                         | parameters                                   |
//! |------------------------------|----------------------------------------------|
//! | `intercom.mode`              | `{ session, mode }`                          |
//! | `intercom.reset`             | `{ session }`                                |
//! | `intercom.address`           | `{ session, address? }`                      |
//! | `intercom.broadcast_allowed` | `{ session, allowed }`                       |
//! | `espnow.send`                | `{ address?, data }`, data text or bytes     |
//! | `espnow.new.peer`            | `"AA:BB:.."` or `{ address, channel? }`      |
//! | `espnow.del.peer`            | `"AA:BB:.."` or `{ address }`                |
//! | `espnow.channel`             | `6` or `{ channel }`                         |

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ConfigError;
use crate::events::EventKind;
use crate::peers::PeerParams;
use crate::protocol::{Destination, MacAddress, Mode};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetMode { session: String, mode: Mode },
    ResetSession { session: String },
    SetTarget {
        session: String,
        target: Option<MacAddress>,
    },
    SetBroadcastAllowed { session: String, allowed: bool },
    Send { destination: Destination, payload: Bytes },
    AddPeer { address: MacAddress, params: PeerParams },
    DeletePeer { address: MacAddress },
    SetChannel { channel: u8 },
}

impl Action {
    /// Session the action operates on
    pub fn session(&self) -> Option<&str> {
        match self {
            Action::SetMode { session, .. }
            | Action::ResetSession { session }
            | Action::SetTarget { session, .. }
            | Action::SetBroadcastAllowed { session, .. } => Some(session),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    IsMode { session: String, mode: Mode },
}

impl Condition {
    pub fn session(&self) -> &str {
        match self {
            Condition::IsMode { session, .. } => session,
        }
    }
}

/// An action bound to an event, compiled from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Automation {
    pub on: EventKind,
    /// Only fire for events from this session
    pub session: Option<String>,
    /// Only fire while this condition holds
    pub condition: Option<Condition>,
    pub action: Action,
}

pub type ActionParser = fn(&Value) -> Result<Action, String>;
pub type ConditionParser = fn(&Value) -> Result<Condition, String>;

/// Name-keyed table of action and condition parsers
pub struct ActionRegistry {
    actions: HashMap<&'static str, ActionParser>,
    conditions: HashMap<&'static str, ConditionParser>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut registry = Self {
            actions: HashMap::new(),
            conditions: HashMap::new(),
        };
        registry.register("intercom.mode", parse_set_mode);
        registry.register("intercom.reset", parse_reset);
        registry.register("intercom.address", parse_set_target);
        registry.register("intercom.broadcast_allowed", parse_broadcast_allowed);
        registry.register("espnow.send", parse_send);
        registry.register("espnow.new.peer", parse_new_peer);
        registry.register("espnow.del.peer", parse_del_peer);
        registry.register("espnow.channel", parse_channel);
        registry.register_condition("intercom.is_mode", parse_is_mode);
        registry
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an action parser
    pub fn register(&mut self, name: &'static str, parser: ActionParser) {
        self.actions.insert(name, parser);
    }

    pub fn register_condition(&mut self, name: &'static str, parser: ConditionParser) {
        self.conditions.insert(name, parser);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered action names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.actions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn parse(&self, name: &str, params: &Value) -> Result<Action, ConfigError> {
        let parser = self
            .actions
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAction(name.to_string()))?;
        parser(params).map_err(|reason| ConfigError::InvalidAction {
            name: name.to_string(),
            reason,
        })
    }

    pub fn parse_condition(&self, name: &str, params: &Value) -> Result<Condition, ConfigError> {
        let parser = self
            .conditions
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAction(name.to_string()))?;
        parser(params).map_err(|reason| ConfigError::InvalidAction {
            name: name.to_string(),
            reason,
        })
    }
}

fn params<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    T::deserialize(value).map_err(|e| e.to_string())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ModeParams {
    session: String,
    mode: Mode,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionOnly {
    session: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetParams {
    session: String,
    #[serde(default)]
    address: Option<MacAddress>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BroadcastParams {
    session: String,
    allowed: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Data {
    Text(String),
    Raw(Vec<u8>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SendParams {
    #[serde(default)]
    address: Option<MacAddress>,
    data: Data,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PeerParam {
    Simple(MacAddress),
    Full {
        address: MacAddress,
        #[serde(default)]
        channel: Option<u8>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChannelParam {
    Simple(u8),
    Full { channel: u8 },
}

fn parse_set_mode(value: &Value) -> Result<Action, String> {
    let p: ModeParams = params(value)?;
    Ok(Action::SetMode {
        session: p.session,
        mode: p.mode,
    })
}

fn parse_reset(value: &Value) -> Result<Action, String> {
    let p: SessionOnly = params(value)?;
    Ok(Action::ResetSession { session: p.session })
}

fn parse_set_target(value: &Value) -> Result<Action, String> {
    let p: TargetParams = params(value)?;
    Ok(Action::SetTarget {
        session: p.session,
        target: p.address.filter(|a| !a.is_broadcast()),
    })
}

fn parse_broadcast_allowed(value: &Value) -> Result<Action, String> {
    let p: BroadcastParams = params(value)?;
    Ok(Action::SetBroadcastAllowed {
        session: p.session,
        allowed: p.allowed,
    })
}

fn parse_send(value: &Value) -> Result<Action, String> {
    let p: SendParams = params(value)?;
    let payload = match p.data {
        Data::Text(text) => Bytes::from(text.into_bytes()),
        Data::Raw(bytes) => Bytes::from(bytes),
    };
    Ok(Action::Send {
        destination: Destination::from(p.address),
        payload,
    })
}

fn parse_new_peer(value: &Value) -> Result<Action, String> {
    let (address, channel) = match params::<PeerParam>(value)? {
        PeerParam::Simple(address) => (address, None),
        PeerParam::Full { address, channel } => (address, channel),
    };
    if address.is_broadcast() {
        return Err("the broadcast address cannot be a peer".into());
    }
    Ok(Action::AddPeer {
        address,
        params: PeerParams { channel },
    })
}

fn parse_del_peer(value: &Value) -> Result<Action, String> {
    let address = match params::<PeerParam>(value)? {
        PeerParam::Simple(address) | PeerParam::Full { address, .. } => address,
    };
    Ok(Action::DeletePeer { address })
}

fn parse_channel(value: &Value) -> Result<Action, String> {
    let channel = match params::<ChannelParam>(value)? {
        ChannelParam::Simple(channel) | ChannelParam::Full { channel } => channel,
    };
    Ok(Action::SetChannel { channel })
}

fn parse_is_mode(value: &Value) -> Result<Condition, String> {
    let p: ModeParams = params(value)?;
    Ok(Condition::IsMode {
        session: p.session,
        mode: p.mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_set_mode() {
        let registry = ActionRegistry::new();
        let action = registry
            .parse("intercom.mode", &json!({"session": "main", "mode": "MICROPHONE"}))
            .unwrap();
        assert_eq!(
            action,
            Action::SetMode {
                session: "main".into(),
                mode: Mode::Microphone
            }
        );
        assert_eq!(action.session(), Some("main"));
    }

    #[test]
    fn test_parse_send_text_and_bytes() {
        let registry = ActionRegistry::new();
        let action = registry
            .parse("espnow.send", &json!({"address": "AA:BB:CC:DD:EE:FF", "data": "hi"}))
            .unwrap();
        assert_eq!(
            action,
            Action::Send {
                destination: Destination::Unicast("AA:BB:CC:DD:EE:FF".parse().unwrap()),
                payload: Bytes::from_static(b"hi"),
            }
        );

        let action = registry
            .parse("espnow.send", &json!({"data": [1, 2, 3]}))
            .unwrap();
        assert_eq!(
            action,
            Action::Send {
                destination: Destination::Broadcast,
                payload: Bytes::from_static(&[1, 2, 3]),
            }
        );
    }

    #[test]
    fn test_peer_simple_and_full_forms() {
        let registry = ActionRegistry::new();
        let mac: MacAddress = "24:6F:28:00:00:01".parse().unwrap();
        assert_eq!(
            registry
                .parse("espnow.new.peer", &json!("24:6F:28:00:00:01"))
                .unwrap(),
            Action::AddPeer {
                address: mac,
                params: PeerParams::default()
            }
        );
        assert_eq!(
            registry
                .parse("espnow.new.peer", &json!({"address": "24:6F:28:00:00:01", "channel": 6}))
                .unwrap(),
            Action::AddPeer {
                address: mac,
                params: PeerParams { channel: Some(6) }
            }
        );
        assert!(registry
            .parse("espnow.new.peer", &json!("FF:FF:FF:FF:FF:FF"))
            .is_err());
    }

    #[test]
    fn test_channel_forms() {
        let registry = ActionRegistry::new();
        assert_eq!(
            registry.parse("espnow.channel", &json!(6)).unwrap(),
            Action::SetChannel { channel: 6 }
        );
        assert_eq!(
            registry.parse("espnow.channel", &json!({"channel": 11})).unwrap(),
            Action::SetChannel { channel: 11 }
        );
    }

    #[test]
    fn test_unknown_and_invalid() {
        let registry = ActionRegistry::new();
        assert_eq!(
            registry.parse("intercom.volume", &json!({})),
            Err(ConfigError::UnknownAction("intercom.volume".into()))
        );
        assert!(matches!(
            registry.parse("intercom.mode", &json!({"session": "main", "mode": "LOUD"})),
            Err(ConfigError::InvalidAction { .. })
        ));
        assert!(matches!(
            registry.parse("espnow.del.peer", &json!("not-a-mac")),
            Err(ConfigError::InvalidAction { .. })
        ));
    }

    #[test]
    fn test_condition() {
        let registry = ActionRegistry::new();
        assert_eq!(
            registry
                .parse_condition("intercom.is_mode", &json!({"session": "s", "mode": "NONE"}))
                .unwrap(),
            Condition::IsMode {
                session: "s".into(),
                mode: Mode::None
            }
        );
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = ActionRegistry::new();
        registry.register("intercom.stop", |v| {
            let p: SessionOnly = params(v)?;
            Ok(Action::SetMode {
                session: p.session,
                mode: Mode::None,
            })
        });
        assert!(registry.contains("intercom.stop"));
        assert!(registry.names().contains(&"espnow.send"));
    }
}
