//! Node configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! broadcast-only node with no sessions.
//!
//! ```toml
//! [link]
//! channel = 6
//! auto_new_peer = true
//! peers = [{ address = "24:6F:28:00:00:01" }]
//!
//! [[sessions]]
//! name = "intercom"
//! microphone = "mic0"
//! speaker = "spk0"
//! broadcast_allowed = true
//! vad_threshold = 20
//!
//! [[automations]]
//! on = "session_error"
//! action = "intercom.reset"
//! params = { session = "intercom" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actions::{Action, ActionRegistry, Automation, Condition};
use crate::audio::bridge::{BridgeParams, NoiseSuppression};
use crate::constants::*;
use crate::error::{ConfigError, Error};
use crate::events::EventKind;
use crate::network::link::{validate_channel, LinkOptions};
use crate::protocol::{MacAddress, Mode};
use crate::session::SessionParams;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub sessions: Vec<SessionConfig>,
    pub automations: Vec<AutomationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Radio channel, 1-14
    pub channel: u8,
    /// Add unknown stations to the peer table automatically
    pub auto_new_peer: bool,
    /// Station address; random when absent (emulated radios only)
    pub local_address: Option<MacAddress>,
    pub peers: Vec<PeerConfig>,
    pub max_peers: usize,
    pub send_retries: u32,
    pub retry_backoff_ms: u64,
    pub acquire_timeout_ms: u64,
    /// Silence after which a peer is no longer considered alive
    pub peer_timeout_ms: u64,
    /// Interval between heartbeat pings; 0 disables them
    pub heartbeat_ms: u64,
    pub inbound_queue: usize,
    /// UDP port for the LAN radio emulation
    pub udp_port: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let options = LinkOptions::default();
        Self {
            channel: options.channel,
            auto_new_peer: options.auto_new_peer,
            local_address: None,
            peers: Vec::new(),
            max_peers: options.max_peers,
            send_retries: options.send_retries,
            retry_backoff_ms: options.retry_backoff.as_millis() as u64,
            acquire_timeout_ms: options.acquire_timeout.as_millis() as u64,
            peer_timeout_ms: 30_000,
            heartbeat_ms: 10_000,
            inbound_queue: options.inbound_queue,
            udp_port: DEFAULT_UDP_PORT,
        }
    }
}

impl LinkConfig {
    pub fn options(&self) -> LinkOptions {
        LinkOptions {
            channel: self.channel,
            auto_new_peer: self.auto_new_peer,
            max_peers: self.max_peers,
            send_retries: self.send_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            inbound_queue: self.inbound_queue,
        }
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_ms > 0).then(|| Duration::from_millis(self.heartbeat_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub address: MacAddress,
    #[serde(default)]
    pub channel: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub name: String,
    /// Microphone device id
    pub microphone: Option<String>,
    /// Speaker device id
    pub speaker: Option<String>,
    /// Remote station; audio is broadcast when absent and allowed
    pub address: Option<MacAddress>,
    pub broadcast_allowed: bool,
    pub noise_suppression_level: u8,
    /// Automatic gain in dBFS, 0-31
    pub auto_gain: u8,
    pub volume_multiplier: f32,
    pub vad_threshold: Option<u8>,
    pub vad_release_ms: u64,
    pub receive_timeout_ms: u64,
    /// Frames buffered before playback starts
    pub jitter_delay: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let params = SessionParams::default();
        Self {
            name: "intercom".to_string(),
            microphone: None,
            speaker: None,
            address: None,
            broadcast_allowed: params.broadcast_allowed,
            noise_suppression_level: params.bridge.noise_suppression.level(),
            auto_gain: params.bridge.auto_gain_dbfs,
            volume_multiplier: params.bridge.volume_multiplier,
            vad_threshold: None,
            vad_release_ms: params.vad_release.as_millis() as u64,
            receive_timeout_ms: params.receive_timeout.as_millis() as u64,
            jitter_delay: params.bridge.jitter_delay,
        }
    }
}

impl SessionConfig {
    pub fn supports(&self, mode: Mode) -> bool {
        match mode {
            Mode::None => true,
            Mode::Microphone => self.microphone.is_some(),
            Mode::Speaker => self.speaker.is_some(),
        }
    }

    pub fn params(&self) -> Result<SessionParams, ConfigError> {
        let bridge = BridgeParams {
            noise_suppression: NoiseSuppression::new(self.noise_suppression_level)?,
            auto_gain_dbfs: self.auto_gain,
            volume_multiplier: self.volume_multiplier,
            jitter_delay: self.jitter_delay,
        };
        bridge.validate()?;
        if self.vad_threshold.is_some() && self.microphone.is_none() {
            return Err(ConfigError::VadWithoutMicrophone(self.name.clone()));
        }
        Ok(SessionParams {
            bridge,
            target: self.address.filter(|a| !a.is_broadcast()),
            broadcast_allowed: self.broadcast_allowed,
            vad_threshold: self.vad_threshold,
            vad_release: Duration::from_millis(self.vad_release_ms),
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Event that triggers the action
    pub on: EventKind,
    /// Only react to events from this session
    #[serde(default)]
    pub session: Option<String>,
    /// Registered action name, e.g. `intercom.mode`
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub condition: Option<ConditionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl AppConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `config.toml` in the platform configuration directory
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "nowtalk", "nowtalk-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn session(&self, name: &str) -> Option<&SessionConfig> {
        self.sessions.iter().find(|s| s.name == name)
    }

    /// Check link and session settings. Automations are checked when they
    /// are compiled against a registry, see [`AppConfig::automations`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_channel(self.link.channel)?;

        let mut peers = HashSet::new();
        for peer in &self.link.peers {
            if !peers.insert(peer.address) {
                return Err(ConfigError::DuplicatePeer(peer.address));
            }
            if let Some(channel) = peer.channel {
                validate_channel(channel)?;
            }
        }
        if self.link.peers.len() > self.link.max_peers {
            return Err(ConfigError::TooManyPeers {
                count: self.link.peers.len(),
                max: self.link.max_peers,
            });
        }

        let mut names = HashSet::new();
        let mut devices = HashSet::new();
        for session in &self.sessions {
            if !names.insert(session.name.as_str()) {
                return Err(ConfigError::DuplicateSession(session.name.clone()));
            }
            session.params()?;
            for device in session.microphone.iter().chain(session.speaker.iter()) {
                if !devices.insert(device.as_str()) {
                    return Err(ConfigError::DeviceInUse(device.clone()));
                }
            }
        }
        Ok(())
    }

    /// Compile the automation list against `registry`, checking that every
    /// referenced session exists and can enter the requested mode
    pub fn automations(&self, registry: &ActionRegistry) -> Result<Vec<Automation>, ConfigError> {
        self.automations
            .iter()
            .map(|auto| {
                let action = registry.parse(&auto.action, &auto.params)?;
                self.check_action(&action)?;

                let condition = match &auto.condition {
                    Some(c) => {
                        let condition = registry.parse_condition(&c.name, &c.params)?;
                        self.check_condition(&condition)?;
                        Some(condition)
                    }
                    None => None,
                };

                if let Some(session) = &auto.session {
                    self.require_session(session)?;
                }

                Ok(Automation {
                    on: auto.on,
                    session: auto.session.clone(),
                    condition,
                    action,
                })
            })
            .collect()
    }

    fn require_session(&self, name: &str) -> Result<&SessionConfig, ConfigError> {
        self.session(name)
            .ok_or_else(|| ConfigError::UnknownSession(name.to_string()))
    }

    fn check_action(&self, action: &Action) -> Result<(), ConfigError> {
        if let Some(name) = action.session() {
            let session = self.require_session(name)?;
            if let Action::SetMode { mode, .. } = action {
                if !session.supports(*mode) {
                    return Err(ConfigError::ModeUnsupported {
                        session: name.to_string(),
                        mode: *mode,
                    });
                }
            }
        }
        match action {
            Action::SetChannel { channel } => validate_channel(*channel),
            Action::AddPeer { params, .. } => params.channel.map_or(Ok(()), validate_channel),
            Action::Send { payload, .. } if payload.len() > MAX_PAYLOAD => {
                Err(ConfigError::InvalidAction {
                    name: "espnow.send".to_string(),
                    reason: format!("{} bytes exceeds the {}-byte payload limit", payload.len(), MAX_PAYLOAD),
                })
            }
            _ => Ok(()),
        }
    }

    fn check_condition(&self, condition: &Condition) -> Result<(), ConfigError> {
        self.require_session(condition.session()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_valid() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.link.channel, DEFAULT_CHANNEL);
        assert!(config.sessions.is_empty());
    }

    #[test]
    fn test_full_example() {
        let config = AppConfig::from_toml_str(
            r#"
            [link]
            channel = 6
            auto_new_peer = true
            peers = [{ address = "24:6F:28:00:00:01" }, { address = "24:6F:28:00:00:02", channel = 6 }]

            [[sessions]]
            name = "intercom"
            microphone = "mic0"
            speaker = "spk0"
            broadcast_allowed = true
            noise_suppression_level = 2
            auto_gain = 6
            volume_multiplier = 1.5
            vad_threshold = 20

            [[automations]]
            on = "session_error"
            session = "intercom"
            action = "intercom.reset"
            params = { session = "intercom" }

            [[automations]]
            on = "new_peer"
            action = "espnow.send"
            params = { data = "hello" }
            condition = { name = "intercom.is_mode", params = { session = "intercom", mode = "NONE" } }
            "#,
        )
        .unwrap();

        assert_eq!(config.link.peers.len(), 2);
        let params = config.sessions[0].params().unwrap();
        assert_eq!(params.vad_threshold, Some(20));
        assert_eq!(params.bridge.noise_suppression.gate(), 128);

        let automations = config.automations(&ActionRegistry::default()).unwrap();
        assert_eq!(automations.len(), 2);
        assert_eq!(automations[0].on, EventKind::SessionError);
        assert!(automations[1].condition.is_some());
    }

    #[test]
    fn test_rejects_channel() {
        let err = AppConfig::from_toml_str("[link]\nchannel = 15\n").unwrap_err();
        assert_eq!(err, ConfigError::InvalidChannel(15));
    }

    #[test]
    fn test_rejects_session_values() {
        let err = AppConfig::from_toml_str("[[sessions]]\nname = \"a\"\nnoise_suppression_level = 5\n")
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidNoiseSuppression(5));

        let err = AppConfig::from_toml_str("[[sessions]]\nname = \"a\"\nvolume_multiplier = 0.0\n")
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidVolume(0.0));

        let err = AppConfig::from_toml_str("[[sessions]]\nname = \"a\"\nvolume_multiplier = inf\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVolume(v) if v.is_infinite()));

        let err = AppConfig::from_toml_str("[[sessions]]\nname = \"a\"\nauto_gain = 32\n").unwrap_err();
        assert_eq!(err, ConfigError::InvalidAutoGain(32));

        let err = AppConfig::from_toml_str("[[sessions]]\nname = \"a\"\nvad_threshold = 10\n")
            .unwrap_err();
        assert_eq!(err, ConfigError::VadWithoutMicrophone("a".into()));
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = AppConfig::from_toml_str("[[sessions]]\nname = \"a\"\n[[sessions]]\nname = \"a\"\n")
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateSession("a".into()));

        let err = AppConfig::from_toml_str(
            "[link]\npeers = [{ address = \"02:00:00:00:00:01\" }, { address = \"02:00:00:00:00:01\" }]\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePeer(_)));

        let err = AppConfig::from_toml_str(
            "[[sessions]]\nname = \"a\"\nmicrophone = \"m\"\n[[sessions]]\nname = \"b\"\nspeaker = \"m\"\n",
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::DeviceInUse("m".into()));
    }

    #[test]
    fn test_too_many_peers() {
        let err = AppConfig::from_toml_str(
            "[link]\nmax_peers = 1\npeers = [{ address = \"02:00:00:00:00:01\" }, { address = \"02:00:00:00:00:02\" }]\n",
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::TooManyPeers { count: 2, max: 1 });
    }

    fn compile(text: &str) -> Result<Vec<Automation>, ConfigError> {
        AppConfig::from_toml_str(text)?.automations(&ActionRegistry::default())
    }

    #[test]
    fn test_mode_requires_device() {
        let err = compile(
            r#"
            [[sessions]]
            name = "listener"
            speaker = "spk0"

            [[automations]]
            on = "new_peer"
            action = "intercom.mode"
            params = { session = "listener", mode = "MICROPHONE" }
            "#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::ModeUnsupported {
                session: "listener".into(),
                mode: Mode::Microphone
            }
        );
    }

    #[test]
    fn test_unknown_action_and_session() {
        let text = "[[automations]]\non = \"new_peer\"\naction = \"intercom.explode\"\n";
        // Parses; the action name is resolved against a registry later
        assert!(AppConfig::from_toml_str(text).is_ok());
        assert_eq!(
            compile(text).unwrap_err(),
            ConfigError::UnknownAction("intercom.explode".into())
        );

        let err = compile(
            "[[automations]]\non = \"new_peer\"\naction = \"intercom.reset\"\nparams = { session = \"ghost\" }\n",
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::UnknownSession("ghost".into()));
    }
}
