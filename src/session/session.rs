//! Half-duplex intercom session
//!
//! Binds an optional microphone and speaker to the link. The session is
//! frame-paced: the owner calls [`Session::tick`] regularly and routes
//! inbound audio to [`Session::handle_audio`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::bridge::{AudioBridge, BridgeParams};
use crate::audio::buffer::AudioFrame;
use crate::audio::device::{MicrophoneSource, SpeakerSink};
use crate::codec;
use crate::error::{CodecError, ConfigError, DeviceError, SessionError};
use crate::events::{Event, EventBus};
use crate::network::link::LinkLayer;
use crate::protocol::{Destination, MacAddress, Mode, PacketKind};
use crate::session::state::{Input, Lifecycle, SessionState};

/// VAD thresholds are configured on a 0-255 scale of peak amplitude
const VAD_SCALE: u16 = 128;

#[derive(Debug, Clone)]
pub struct SessionParams {
    pub bridge: BridgeParams,
    /// Remote station to talk to; without one, audio is broadcast if allowed
    pub target: Option<MacAddress>,
    pub broadcast_allowed: bool,
    /// Peak level (0-255) that starts capture while idle
    pub vad_threshold: Option<u8>,
    /// Quiet time before a voice-started capture ends
    pub vad_release: Duration,
    /// Silence before inbound-started playback ends
    pub receive_timeout: Duration,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            bridge: BridgeParams::default(),
            target: None,
            broadcast_allowed: false,
            vad_threshold: None,
            vad_release: Duration::from_millis(500),
            receive_timeout: Duration::from_millis(1000),
        }
    }
}

/// Why the session is capturing or playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Mode set by an action
    Explicit,
    /// Voice activity (capture) or inbound audio (playback)
    Automatic,
}

pub struct Session {
    name: String,
    state: SessionState,
    params: SessionParams,
    link: Arc<LinkLayer>,
    events: Arc<EventBus>,
    microphone: Option<Box<dyn MicrophoneSource>>,
    speaker: Option<Box<dyn SpeakerSink>>,
    bridge: AudioBridge,
    mic_running: bool,
    speaker_running: bool,
    origin: Origin,
    /// Station currently heard
    remote: Option<MacAddress>,
    last_voice: Instant,
    last_inbound: Instant,
    frames_sent: u64,
    frames_dropped: u64,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        params: SessionParams,
        link: Arc<LinkLayer>,
        microphone: Option<Box<dyn MicrophoneSource>>,
        speaker: Option<Box<dyn SpeakerSink>>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if params.vad_threshold.is_some() && microphone.is_none() {
            return Err(ConfigError::VadWithoutMicrophone(name));
        }
        let bridge = AudioBridge::new(params.bridge)?;
        let events = link.events().clone();
        let now = Instant::now();

        let mut session = Self {
            name,
            state: SessionState::Idle,
            params,
            link,
            events,
            microphone,
            speaker,
            bridge,
            mic_running: false,
            speaker_running: false,
            origin: Origin::Explicit,
            remote: None,
            last_voice: now,
            last_inbound: now,
            frames_sent: 0,
            frames_dropped: 0,
        };
        // Start VAD monitoring
        if let Err(e) = session.sync_devices() {
            tracing::warn!("Session '{}' device start failed: {}", session.name, e);
            session.fault(e.code(), e.message().to_string(), now);
        }
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_in_mode(&self, mode: Mode) -> bool {
        self.state.mode() == mode
    }

    pub fn supports(&self, mode: Mode) -> bool {
        match mode {
            Mode::None => true,
            Mode::Microphone => self.microphone.is_some(),
            Mode::Speaker => self.speaker.is_some(),
        }
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn set_broadcast_allowed(&mut self, allowed: bool) {
        self.params.broadcast_allowed = allowed;
    }

    /// Change the remote station; `None` falls back to broadcast if allowed
    pub fn set_target(&mut self, target: Option<MacAddress>) {
        self.params.target = target.filter(|a| !a.is_broadcast());
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames not sent (no destination, send failure) or not played
    /// (half duplex, another station)
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Explicitly select a mode
    pub fn set_mode(&mut self, mode: Mode, now: Instant) -> Result<(), SessionError> {
        if !self.supports(mode) {
            return Err(SessionError::ModeUnsupported {
                session: self.name.clone(),
                mode,
            });
        }
        let input = match mode {
            Mode::None => Input::Stop,
            Mode::Microphone => Input::Capture,
            Mode::Speaker => Input::Listen,
        };
        if mode != Mode::None {
            self.origin = Origin::Explicit;
        }
        if mode == Mode::Speaker {
            self.remote = None;
        }
        self.apply(input, now);
        Ok(())
    }

    /// Return to idle, leaving the error state if necessary
    pub fn reset(&mut self, now: Instant) {
        self.apply(Input::Reset, now);
    }

    /// Whether this session wants audio from `source`
    pub fn accepts_from(&self, source: &MacAddress) -> bool {
        self.params.target.map_or(true, |target| target == *source)
    }

    /// Handle one inbound audio frame
    pub fn handle_audio(&mut self, source: MacAddress, frame: AudioFrame, now: Instant) {
        if !self.accepts_from(&source) || self.speaker.is_none() {
            return;
        }

        match self.state {
            SessionState::Capturing | SessionState::Error => {
                self.frames_dropped += 1;
                return;
            }
            SessionState::Idle => {
                // A lone end marker has nothing to play
                if frame.flags.is_end() && frame.samples.is_empty() {
                    return;
                }
                self.origin = Origin::Automatic;
                self.remote = Some(source);
                self.apply(Input::InboundAudio, now);
                if self.state != SessionState::Playing {
                    return;
                }
            }
            SessionState::Playing => match self.remote {
                Some(remote) if remote != source => {
                    tracing::trace!("Session '{}' busy with {}, ignoring {}", self.name, remote, source);
                    self.frames_dropped += 1;
                    return;
                }
                Some(_) => {}
                None => self.remote = Some(source),
            },
        }

        self.last_inbound = now;
        if frame.flags.is_start() {
            self.bridge.reset_inbound();
        }

        let end = frame.flags.is_end();
        if !frame.samples.is_empty() {
            self.bridge.receive(frame);
        }

        let Some(speaker) = self.speaker.as_deref_mut() else {
            return;
        };
        let played = if end {
            self.bridge.flush(speaker)
        } else {
            self.bridge.play_ready(speaker)
        };
        if let Err(e) = played {
            self.device_fault(e, now);
            return;
        }

        if end {
            self.remote = None;
            if self.origin == Origin::Automatic {
                self.apply(Input::Stop, now);
            }
        }
    }

    /// An audio packet for this session could not be decoded
    pub fn handle_decode_error(&mut self, source: MacAddress, error: &CodecError, now: Instant) {
        if self.state == SessionState::Playing && self.remote == Some(source) {
            self.fault("decode", error.to_string(), now);
        } else {
            tracing::debug!("Session '{}' ignoring bad audio from {}: {}", self.name, source, error);
        }
    }

    /// Advance capture, voice detection and timeouts
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            SessionState::Idle if self.params.vad_threshold.is_some() => self.monitor_voice(now),
            SessionState::Capturing => self.capture(now),
            SessionState::Playing => {
                if self.origin == Origin::Automatic
                    && now.saturating_duration_since(self.last_inbound) >= self.params.receive_timeout
                {
                    tracing::debug!("Session '{}' receive timeout", self.name);
                    self.apply(Input::Stop, now);
                }
            }
            _ => {}
        }
    }

    fn vad_level(&self) -> Option<u16> {
        self.params
            .vad_threshold
            .map(|t| u16::from(t).saturating_mul(VAD_SCALE))
    }

    fn monitor_voice(&mut self, now: Instant) {
        let Some(level) = self.vad_level() else {
            return;
        };
        loop {
            let frame = match self.pull() {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(e) => return self.device_fault(e, now),
            };
            if frame.peak() >= level {
                tracing::debug!("Session '{}' voice detected", self.name);
                self.origin = Origin::Automatic;
                self.apply(Input::Capture, now);
                if self.state == SessionState::Capturing {
                    let flags = frame.flags.with_start();
                    self.send_frame(&AudioFrame { flags, ..frame });
                    self.capture(now);
                }
                return;
            }
        }
    }

    fn capture(&mut self, now: Instant) {
        let level = self.vad_level();
        loop {
            let frame = match self.pull() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return self.device_fault(e, now),
            };
            if level.map_or(false, |level| frame.peak() >= level) {
                self.last_voice = now;
            }
            self.send_frame(&frame);
        }

        if self.origin == Origin::Automatic
            && now.saturating_duration_since(self.last_voice) >= self.params.vad_release
        {
            tracing::debug!("Session '{}' voice released", self.name);
            self.apply(Input::Stop, now);
        }
    }

    fn pull(&mut self) -> Result<Option<AudioFrame>, DeviceError> {
        match self.microphone.as_deref_mut() {
            Some(mic) => self.bridge.pull_frame(mic),
            None => Ok(None),
        }
    }

    fn destination(&self) -> Option<Destination> {
        match self.params.target {
            Some(target) => Some(Destination::from(target)),
            None if self.params.broadcast_allowed => Some(Destination::Broadcast),
            None => None,
        }
    }

    fn send_frame(&mut self, frame: &AudioFrame) {
        let Some(destination) = self.destination() else {
            self.frames_dropped += 1;
            tracing::trace!("Session '{}' has no target and broadcast is off", self.name);
            return;
        };
        let payload = match codec::encode_audio(frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Session '{}' cannot encode frame: {}", self.name, e);
                return;
            }
        };
        match self.link.send_packet(PacketKind::Audio, destination, &payload) {
            Ok(()) => self.frames_sent += 1,
            Err(e) => {
                self.frames_dropped += 1;
                tracing::warn!("Session '{}' audio send failed: {}", self.name, e);
            }
        }
    }

    fn device_fault(&mut self, error: DeviceError, now: Instant) {
        tracing::error!("Session '{}' device failure: {}", self.name, error);
        self.fault(error.code(), error.message().to_string(), now);
    }

    fn fault(&mut self, code: &str, message: String, now: Instant) {
        self.apply(
            Input::Fault {
                code: code.to_string(),
                message,
            },
            now,
        );
    }

    fn apply(&mut self, input: Input, now: Instant) {
        let previous = self.state;
        let (next, lifecycle) = previous.apply(&input);

        if previous == SessionState::Capturing && next != SessionState::Capturing {
            let end = self.bridge.end_stream();
            self.send_frame(&end);
        }
        if previous == SessionState::Playing && next != SessionState::Playing {
            self.bridge.reset_inbound();
            self.remote = None;
        }
        if next == SessionState::Capturing && previous != SessionState::Capturing {
            self.last_voice = now;
        }
        if next == SessionState::Playing && previous != SessionState::Playing {
            self.last_inbound = now;
        }

        self.state = next;
        if previous != next {
            tracing::info!("Session '{}': {:?} -> {:?}", self.name, previous, next);
        }
        for notification in lifecycle {
            self.events.emit(&self.event(notification));
        }

        if let Err(e) = self.sync_devices() {
            self.device_fault(e, now);
        }
    }

    fn event(&self, lifecycle: Lifecycle) -> Event {
        let session = self.name.clone();
        match lifecycle {
            Lifecycle::Start(mode) => Event::SessionStart { session, mode },
            Lifecycle::End(mode) => Event::SessionEnd { session, mode },
            Lifecycle::Error { code, message } => Event::SessionError {
                session,
                code,
                message,
            },
            Lifecycle::Idle => Event::SessionIdle { session },
        }
    }

    /// Run exactly the devices the current state needs
    fn sync_devices(&mut self) -> Result<(), DeviceError> {
        let want_mic = match self.state {
            SessionState::Capturing => true,
            SessionState::Idle => self.params.vad_threshold.is_some(),
            _ => false,
        };
        let want_speaker = self.state == SessionState::Playing;

        // Stop first so a half-duplex device pair never overlaps
        if !want_mic && self.mic_running {
            if let Some(mic) = self.microphone.as_deref_mut() {
                mic.stop();
            }
            self.mic_running = false;
            self.bridge.reset_outbound();
        }
        if !want_speaker && self.speaker_running {
            if let Some(speaker) = self.speaker.as_deref_mut() {
                speaker.stop();
            }
            self.speaker_running = false;
        }
        if want_mic && !self.mic_running {
            if let Some(mic) = self.microphone.as_deref_mut() {
                mic.start()?;
                self.mic_running = true;
            }
        }
        if want_speaker && !self.speaker_running {
            if let Some(speaker) = self.speaker.as_deref_mut() {
                speaker.start()?;
                self.speaker_running = true;
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mic) = self.microphone.as_deref_mut() {
            if self.mic_running {
                mic.stop();
            }
        }
        if let Some(speaker) = self.speaker.as_deref_mut() {
            if self.speaker_running {
                speaker.stop();
            }
        }
    }
}
