//! Intercom sessions
//!
//! A session is one half-duplex audio endpoint: idle, capturing from its
//! microphone, playing to its speaker, or failed.

#[allow(clippy::module_inception)]
mod session;
pub mod state;

pub use session::{Session, SessionParams};
pub use state::{Input, Lifecycle, SessionState};
