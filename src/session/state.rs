//! Session state machine
//!
//! Pure transition table: given the current state and an input it returns
//! the next state and the lifecycle notifications to raise, in order. Side
//! effects (devices, radio, events) are applied by [`super::Session`].

use crate::protocol::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Capturing,
    Playing,
    Error,
}

impl SessionState {
    /// The intercom mode this state corresponds to
    pub fn mode(self) -> Mode {
        match self {
            SessionState::Capturing => Mode::Microphone,
            SessionState::Playing => Mode::Speaker,
            SessionState::Idle | SessionState::Error => Mode::None,
        }
    }

    /// Compute the transition for `input`
    pub fn apply(self, input: &Input) -> (SessionState, Vec<Lifecycle>) {
        use SessionState::*;

        match (self, input) {
            (Error, Input::Capture) => (Capturing, vec![Lifecycle::Idle, start(Capturing)]),
            (Error, Input::Listen) => (Playing, vec![Lifecycle::Idle, start(Playing)]),
            (Error, Input::Stop) | (Error, Input::Reset) => (Idle, vec![Lifecycle::Idle]),
            // Already failed; nothing new to report
            (Error, Input::Fault { .. }) | (Error, Input::InboundAudio) => (Error, vec![]),

            // No on_end for the interrupted mode
            (_, Input::Fault { code, message }) => (
                Error,
                vec![Lifecycle::Error {
                    code: code.clone(),
                    message: message.clone(),
                }],
            ),

            (Idle, Input::Capture) => (Capturing, vec![start(Capturing)]),
            (Idle, Input::Listen) | (Idle, Input::InboundAudio) => (Playing, vec![start(Playing)]),
            (Idle, Input::Stop) | (Idle, Input::Reset) => (Idle, vec![]),

            (Capturing, Input::Capture) => (Capturing, vec![]),
            (Capturing, Input::Listen) => (Playing, vec![end(Capturing), start(Playing)]),
            // Half duplex: inbound audio never interrupts capture
            (Capturing, Input::InboundAudio) => (Capturing, vec![]),
            (Capturing, Input::Stop) | (Capturing, Input::Reset) => (Idle, vec![end(Capturing)]),

            (Playing, Input::Capture) => (Capturing, vec![end(Playing), start(Capturing)]),
            (Playing, Input::Listen) | (Playing, Input::InboundAudio) => (Playing, vec![]),
            (Playing, Input::Stop) | (Playing, Input::Reset) => (Idle, vec![end(Playing)]),
        }
    }
}

fn start(state: SessionState) -> Lifecycle {
    Lifecycle::Start(state.mode())
}

fn end(state: SessionState) -> Lifecycle {
    Lifecycle::End(state.mode())
}

/// Something that drives the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Explicit MICROPHONE mode or voice detected
    Capture,
    /// Explicit SPEAKER mode
    Listen,
    /// Audio addressed to this session arrived
    InboundAudio,
    /// Explicit NONE mode, end of stream, VAD release or receive timeout
    Stop,
    /// Device or decode failure
    Fault { code: String, message: String },
    /// Recover without selecting a mode
    Reset,
}

/// Notification raised by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Start(Mode),
    End(Mode),
    Error { code: String, message: String },
    Idle,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault() -> Input {
        Input::Fault {
            code: "microphone".into(),
            message: "gone".into(),
        }
    }

    #[test]
    fn test_capture_and_stop() {
        let (s, out) = SessionState::Idle.apply(&Input::Capture);
        assert_eq!(s, SessionState::Capturing);
        assert_eq!(out, vec![Lifecycle::Start(Mode::Microphone)]);

        let (s, out) = s.apply(&Input::Stop);
        assert_eq!(s, SessionState::Idle);
        assert_eq!(out, vec![Lifecycle::End(Mode::Microphone)]);
    }

    #[test]
    fn test_capture_preempts_playback() {
        let (s, _) = SessionState::Idle.apply(&Input::InboundAudio);
        assert_eq!(s, SessionState::Playing);

        let (s, out) = s.apply(&Input::Capture);
        assert_eq!(s, SessionState::Capturing);
        assert_eq!(
            out,
            vec![
                Lifecycle::End(Mode::Speaker),
                Lifecycle::Start(Mode::Microphone)
            ]
        );
    }

    #[test]
    fn test_inbound_ignored_while_capturing() {
        let (s, out) = SessionState::Capturing.apply(&Input::InboundAudio);
        assert_eq!(s, SessionState::Capturing);
        assert!(out.is_empty());
    }

    #[test]
    fn test_fault_and_recovery() {
        let (s, out) = SessionState::Playing.apply(&fault());
        assert_eq!(s, SessionState::Error);
        assert_eq!(
            out,
            vec![Lifecycle::Error {
                code: "microphone".into(),
                message: "gone".into()
            }]
        );

        // Still failed: no duplicate notification
        let (s, out) = s.apply(&fault());
        assert_eq!(s, SessionState::Error);
        assert!(out.is_empty());

        let (s, out) = s.apply(&Input::Capture);
        assert_eq!(s, SessionState::Capturing);
        assert_eq!(out, vec![Lifecycle::Idle, Lifecycle::Start(Mode::Microphone)]);
    }

    #[test]
    fn test_reset_from_error() {
        let (s, out) = SessionState::Error.apply(&Input::Reset);
        assert_eq!(s, SessionState::Idle);
        assert_eq!(out, vec![Lifecycle::Idle]);
    }

    #[test]
    fn test_idle_stop_is_silent() {
        let (s, out) = SessionState::Idle.apply(&Input::Stop);
        assert_eq!(s, SessionState::Idle);
        assert!(out.is_empty());
    }
}
