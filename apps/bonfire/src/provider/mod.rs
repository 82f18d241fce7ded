use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use url::Url;

pub mod mock;
pub mod websocket;

/// Raw channel events in provider delivery order. Payloads are handed to
/// the codec untouched.
pub type EventStream = mpsc::UnboundedReceiver<Value>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("token endpoint returned http status {0}")]
    TokenStatus(StatusCode),
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("realtime session rejected: {0}")]
    Rejected(String),
    #[error("session was not established: {0}")]
    Establish(String),
    #[error("channel already subscribed")]
    AlreadySubscribed,
    #[error("session is closed")]
    SessionClosed,
}

/// A hosted realtime pub/sub service, reduced to the capabilities the chat
/// widget actually uses. Implementations authenticate against the token
/// endpoint they are handed and own their transport entirely.
#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    /// Opens a realtime session, resolving once the transport exists. Use
    /// [`ProviderSession::wait_established`] to wait for readiness.
    async fn connect(&self, auth_url: &Url) -> Result<Box<dyn ProviderSession>, ProviderError>;
}

/// A live realtime session. Inbound events and the close notification are
/// owned receivers rather than registered callbacks, so the session
/// controller can drive them from its own loop.
#[async_trait]
pub trait ProviderSession: Send {
    /// Suspends until the session reaches ready state.
    async fn wait_established(&mut self) -> Result<(), ProviderError>;

    /// Subscribes to a named channel and hands back its event stream.
    /// One channel per session; a second call fails.
    fn subscribe(&mut self, channel: &str) -> Result<EventStream, ProviderError>;

    /// A signal that resolves once when the transport closes, for any
    /// reason. May be taken any number of times.
    fn closed_signal(&self) -> ClosedSignal;

    /// Requests closure. Completion is signaled via [`Self::closed_signal`],
    /// never synchronously.
    fn request_close(&self);
}

/// Resolves once the provider transport has closed. A vanished provider
/// task counts as closed.
pub struct ClosedSignal {
    rx: watch::Receiver<bool>,
}

impl ClosedSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|closed| *closed).await;
    }
}
