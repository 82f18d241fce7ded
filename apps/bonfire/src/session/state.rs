use std::fmt;
use thiserror::Error;

/// Connection lifecycle. `Disconnected` is both initial and terminal;
/// `Closing` is only left when the provider confirms closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionPhase::Disconnected => "Disconnected",
            ConnectionPhase::Connecting => "Connecting",
            ConnectionPhase::Connected => "Connected",
            ConnectionPhase::Closing => "Closing",
        };
        f.write_str(label)
    }
}

/// Which widget controls are usable in a given phase. The identity input
/// and connect control stay enabled while a connection attempt is in
/// flight; they only lock once the session is actually up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub identity_input: bool,
    pub connect: bool,
    pub close: bool,
}

impl Controls {
    pub fn for_phase(phase: ConnectionPhase) -> Controls {
        match phase {
            ConnectionPhase::Disconnected | ConnectionPhase::Connecting => Controls {
                identity_input: true,
                connect: true,
                close: false,
            },
            ConnectionPhase::Connected | ConnectionPhase::Closing => Controls {
                identity_input: false,
                connect: false,
                close: true,
            },
        }
    }
}

/// A user action arrived in a phase that does not allow it. Which variants
/// reach the transcript and which are merely logged is the controller's
/// call; the display texts here match what the widget shows.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("You need a nickname to connect to chat")]
    MissingIdentity,
    #[error("You are not connected to the chat.")]
    NotConnected,
    #[error("Connection already established")]
    AlreadyActive,
    #[error("Chat connection is already closed")]
    AlreadyClosed,
}

/// The single mutable session record: display identity plus lifecycle
/// phase. Created on the first connect attempt and reset wholesale when
/// the connection closes, however it closes.
#[derive(Debug, Default)]
pub struct SessionState {
    identity: Option<String>,
    phase: ConnectionPhase,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn can_send(&self) -> bool {
        self.phase() == ConnectionPhase::Connected
    }

    /// Validates a connect attempt. Succeeding adopts the (trimmed)
    /// identity and moves to `Connecting`; an attempt while a session is
    /// active or winding down is the idempotent no-op guard.
    pub fn begin_connect(&mut self, identity_input: &str) -> Result<(), ActionError> {
        match self.phase() {
            ConnectionPhase::Connecting | ConnectionPhase::Connected | ConnectionPhase::Closing => {
                Err(ActionError::AlreadyActive)
            }
            ConnectionPhase::Disconnected => {
                let identity = identity_input.trim();
                if identity.is_empty() {
                    return Err(ActionError::MissingIdentity);
                }
                self.identity = Some(identity.to_string());
                self.phase = ConnectionPhase::Connecting;
                Ok(())
            }
        }
    }

    /// The provider signaled readiness. Returns false for stale signals
    /// (e.g. the user already asked to close).
    pub fn established(&mut self) -> bool {
        if self.phase() == ConnectionPhase::Connecting {
            self.phase = ConnectionPhase::Connected;
            true
        } else {
            false
        }
    }

    /// Validates a close request. The actual transition to `Disconnected`
    /// happens in [`SessionState::closed`] once the provider confirms.
    pub fn begin_close(&mut self) -> Result<(), ActionError> {
        match self.phase() {
            ConnectionPhase::Connecting | ConnectionPhase::Connected => {
                self.phase = ConnectionPhase::Closing;
                Ok(())
            }
            ConnectionPhase::Closing | ConnectionPhase::Disconnected => {
                Err(ActionError::AlreadyClosed)
            }
        }
    }

    /// The provider transport closed, for any reason. Resets every field.
    /// Returns false when there was nothing to tear down.
    pub fn closed(&mut self) -> bool {
        if self.phase() == ConnectionPhase::Disconnected {
            return false;
        }
        *self = SessionState::new();
        true
    }

    /// Aborts a connect attempt that never established. Same wholesale
    /// reset as a closure, usable from any phase.
    pub fn reset(&mut self) {
        *self = SessionState::new();
    }

    /// Applies a `/nick` capture. The empty capture clears the identity.
    pub fn apply_nickname(&mut self, nickname: &str) {
        self.identity = if nickname.is_empty() {
            None
        } else {
            Some(nickname.to_string())
        };
    }
}
