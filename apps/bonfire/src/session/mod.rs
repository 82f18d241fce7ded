pub mod controller;
pub mod state;

pub use controller::{ChatController, SessionEvent};
pub use state::{ActionError, ConnectionPhase, Controls, SessionState};

/// Side effects the session layer asks the surrounding widget to apply.
/// The widget stays dumb: it appends lines, flips controls and clears
/// inputs exactly when told to, so every transition's effects land
/// atomically with the state change that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEffect {
    /// Append a transcript line (the widget adds the timestamp).
    Line(String),
    /// Update the status indicator.
    Status(ConnectionPhase),
    /// Enable/disable the identity input and the connect/close controls.
    Controls(Controls),
    ClearIdentityInput,
    ClearMessageInput,
}
