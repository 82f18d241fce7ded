//! Scriptable in-memory provider for exercising the session controller
//! without a network. Tests arm a session up front, then drive the
//! establishment, inbound events and closure from a [`MockSessionDriver`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

use super::{ClosedSignal, EventStream, ProviderError, ProviderSession, RealtimeProvider};

#[derive(Clone, Default)]
pub struct MockProvider {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    queue: Mutex<VecDeque<Armed>>,
    connect_calls: AtomicUsize,
}

enum Armed {
    Session(MockSession),
    Failure(String),
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms one successful session for the next `connect` call and returns
    /// the driver that scripts it.
    pub fn arm_session(&self) -> MockSessionDriver {
        let shared = Arc::new(SessionShared {
            subscribed: Mutex::new(None),
            close_requested: AtomicBool::new(false),
            closed_tx: watch::channel(false).0,
        });
        let (established_tx, established_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let session = MockSession {
            shared: shared.clone(),
            established: Some(established_rx),
            events: Some(events_rx),
        };
        self.inner
            .queue
            .lock()
            .unwrap()
            .push_back(Armed::Session(session));

        MockSessionDriver {
            shared,
            established: Mutex::new(Some(established_tx)),
            events_tx,
        }
    }

    /// Arms a failing `connect` call.
    pub fn arm_failure(&self, reason: &str) {
        self.inner
            .queue
            .lock()
            .unwrap()
            .push_back(Armed::Failure(reason.to_string()));
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeProvider for MockProvider {
    async fn connect(&self, _auth_url: &Url) -> Result<Box<dyn ProviderSession>, ProviderError> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.queue.lock().unwrap().pop_front() {
            Some(Armed::Session(session)) => Ok(Box::new(session)),
            Some(Armed::Failure(reason)) => Err(ProviderError::Establish(reason)),
            None => Err(ProviderError::Establish("no session armed".into())),
        }
    }
}

struct SessionShared {
    subscribed: Mutex<Option<String>>,
    close_requested: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

struct MockSession {
    shared: Arc<SessionShared>,
    established: Option<oneshot::Receiver<Result<(), String>>>,
    events: Option<EventStream>,
}

#[async_trait]
impl ProviderSession for MockSession {
    async fn wait_established(&mut self) -> Result<(), ProviderError> {
        let rx = self
            .established
            .take()
            .ok_or_else(|| ProviderError::Establish("established signal already consumed".into()))?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ProviderError::Rejected(reason)),
            Err(_) => Err(ProviderError::Establish("driver dropped".into())),
        }
    }

    fn subscribe(&mut self, channel: &str) -> Result<EventStream, ProviderError> {
        let events = self.events.take().ok_or(ProviderError::AlreadySubscribed)?;
        *self.shared.subscribed.lock().unwrap() = Some(channel.to_string());
        Ok(events)
    }

    fn closed_signal(&self) -> ClosedSignal {
        ClosedSignal::new(self.shared.closed_tx.subscribe())
    }

    fn request_close(&self) {
        self.shared.close_requested.store(true, Ordering::SeqCst);
        let _ = self.shared.closed_tx.send(true);
    }
}

/// Test-side handle scripting one armed session.
pub struct MockSessionDriver {
    shared: Arc<SessionShared>,
    established: Mutex<Option<oneshot::Sender<Result<(), String>>>>,
    events_tx: mpsc::UnboundedSender<Value>,
}

impl MockSessionDriver {
    /// Signals session readiness.
    pub fn establish(&self) {
        if let Some(tx) = self.established.lock().unwrap().take() {
            let _ = tx.send(Ok(()));
        }
    }

    /// Rejects the session during establishment.
    pub fn reject(&self, reason: &str) {
        if let Some(tx) = self.established.lock().unwrap().take() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// Injects an inbound channel event.
    pub fn emit(&self, payload: Value) {
        let _ = self.events_tx.send(payload);
    }

    /// Simulates a provider-initiated closure (e.g. network loss).
    pub fn close(&self) {
        let _ = self.shared.closed_tx.send(true);
    }

    pub fn subscribed_channel(&self) -> Option<String> {
        self.shared.subscribed.lock().unwrap().clone()
    }

    pub fn close_requested(&self) -> bool {
        self.shared.close_requested.load(Ordering::SeqCst)
    }
}
