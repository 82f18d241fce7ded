use chat_proto::{encode, should_display, Command, InboundEvent};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::provider::{ClosedSignal, EventStream, ProviderError, ProviderSession, RealtimeProvider};
use crate::relay::{RelayClient, RelayError};
use crate::session::state::{ActionError, ConnectionPhase, Controls, SessionState};
use crate::session::UiEffect;

/// Orchestrates the session state machine against the realtime provider
/// and the message relay. User actions come in through the `&mut self`
/// methods; everything asynchronous (establishment, inbound channel
/// events, relay round-trips, provider closure) re-enters through
/// [`ChatController::next_event`] so no two handlers ever interleave a
/// state mutation.
pub struct ChatController {
    auth_url: Url,
    channel: String,
    provider: Arc<dyn RealtimeProvider>,
    relay: RelayClient,
    state: SessionState,
    session: Option<Box<dyn ProviderSession>>,
    events: Option<EventStream>,
    closed: Option<ClosedSignal>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    effects: mpsc::UnboundedSender<UiEffect>,
}

/// An asynchronous completion the widget loop hands back to
/// [`ChatController::handle_event`]. Opaque on purpose: the widget only
/// ferries it.
pub struct SessionEvent {
    kind: EventKind,
}

enum EventKind {
    Inbound(Value),
    ProviderClosed,
    Internal(InternalEvent),
}

enum InternalEvent {
    ConnectOutcome(Result<Box<dyn ProviderSession>, ProviderError>),
    RelayOutcome {
        kind: RelayKind,
        result: Result<Value, RelayError>,
    },
}

enum RelayKind {
    UserMessage(String),
    Presence(&'static str),
}

impl ChatController {
    pub fn new(
        auth_url: Url,
        channel: impl Into<String>,
        provider: Arc<dyn RealtimeProvider>,
        relay: RelayClient,
    ) -> (Self, mpsc::UnboundedReceiver<UiEffect>) {
        let (effects_tx, effects_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let controller = Self {
            auth_url,
            channel: channel.into(),
            provider,
            relay,
            state: SessionState::new(),
            session: None,
            events: None,
            closed: None,
            internal_tx,
            internal_rx,
            effects: effects_tx,
        };
        (controller, effects_rx)
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase()
    }

    pub fn identity(&self) -> Option<&str> {
        self.state.identity()
    }

    /// Validates the identity, guards re-entry and kicks off session
    /// acquisition. Establishment completes through the event loop.
    pub fn attempt_connect(&mut self, identity_input: &str) {
        match self.state.begin_connect(identity_input) {
            Err(ActionError::AlreadyActive) => {
                debug!(target: "bonfire::session", "connection already established");
                return;
            }
            Err(err) => {
                self.line(err.to_string());
                return;
            }
            Ok(()) => {}
        }
        self.emit(UiEffect::Status(ConnectionPhase::Connecting));

        let provider = self.provider.clone();
        let auth_url = self.auth_url.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = async {
                let mut session = provider.connect(&auth_url).await?;
                session.wait_established().await?;
                Ok(session)
            }
            .await;
            let _ = tx.send(InternalEvent::ConnectOutcome(result));
        });
    }

    /// Encodes and relays a line of user input. Only legal while connected;
    /// the echo, the acknowledgement and the input clear all arrive with
    /// the relay completion.
    pub fn send_user_message(&mut self, text: &str) {
        if !self.state.can_send() {
            self.line(ActionError::NotConnected.to_string());
            return;
        }
        let command = encode(text, self.state.identity());
        if let Some(nickname) = command.nickname_change() {
            self.state.apply_nickname(nickname);
        }
        self.submit(RelayKind::UserMessage(text.to_string()), command);
    }

    /// Asks the provider to close. The state transition and teardown
    /// notifications run when the provider confirms, not here.
    pub fn close_connection(&mut self) {
        if let Err(err) = self.state.begin_close() {
            self.line(err.to_string());
            return;
        }
        self.line("Closing chat.");
        self.emit(UiEffect::Status(ConnectionPhase::Closing));
        if let Some(session) = self.session.as_ref() {
            session.request_close();
        }
    }

    /// Resolves the next asynchronous completion. Pending forever while
    /// there is nothing to wait on, so it composes into a `select!`.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            let next = {
                let internal_rx = &mut self.internal_rx;
                let events = &mut self.events;
                let closed = &mut self.closed;
                tokio::select! {
                    Some(internal) = internal_rx.recv() => Next::Internal(internal),
                    value = recv_or_pend(events) => Next::Inbound(value),
                    _ = closed_or_pend(closed) => Next::Closed,
                }
            };
            match next {
                Next::Internal(internal) => {
                    return SessionEvent {
                        kind: EventKind::Internal(internal),
                    }
                }
                Next::Inbound(Some(value)) => {
                    return SessionEvent {
                        kind: EventKind::Inbound(value),
                    }
                }
                // Event stream ended; the closed signal delivers the verdict.
                Next::Inbound(None) => self.events = None,
                Next::Closed => {
                    return SessionEvent {
                        kind: EventKind::ProviderClosed,
                    }
                }
            }
        }
    }

    /// Applies a completion produced by [`ChatController::next_event`].
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event.kind {
            EventKind::Inbound(value) => self.handle_inbound(value),
            EventKind::ProviderClosed => self.handle_provider_closed(),
            EventKind::Internal(InternalEvent::ConnectOutcome(result)) => {
                self.handle_connect_outcome(result)
            }
            EventKind::Internal(InternalEvent::RelayOutcome { kind, result }) => {
                self.handle_relay_outcome(kind, result)
            }
        }
    }

    fn handle_connect_outcome(
        &mut self,
        result: Result<Box<dyn ProviderSession>, ProviderError>,
    ) {
        let mut session = match result {
            Ok(session) => session,
            Err(err) => {
                warn!(target: "bonfire::session", error = %err, "connection attempt failed");
                self.state.reset();
                self.emit(UiEffect::Status(ConnectionPhase::Disconnected));
                self.emit(UiEffect::Controls(Controls::for_phase(
                    ConnectionPhase::Disconnected,
                )));
                self.line("Unable to reach the chat service.");
                return;
            }
        };

        if !self.state.established() {
            // The user asked to close while the session was still being
            // established; finish the teardown through the normal path.
            debug!(target: "bonfire::session", "session established after close request");
            session.request_close();
            self.closed = Some(session.closed_signal());
            self.session = Some(session);
            return;
        }

        self.line("You are now connected to chat.");
        self.emit(UiEffect::Status(ConnectionPhase::Connected));
        self.emit(UiEffect::Controls(Controls::for_phase(
            ConnectionPhase::Connected,
        )));
        self.emit(UiEffect::ClearIdentityInput);
        let identity = self.state.identity().unwrap_or_default().to_string();
        self.line(format!("Nickname set to {identity}."));

        let announce = encode("/connect", self.state.identity());
        self.submit(RelayKind::Presence("connect"), announce);

        match session.subscribe(&self.channel) {
            Ok(events) => self.events = Some(events),
            Err(err) => {
                warn!(target: "bonfire::session", error = %err, "channel subscription failed");
            }
        }
        self.closed = Some(session.closed_signal());
        self.session = Some(session);
    }

    fn handle_inbound(&mut self, value: Value) {
        let Some(event) = InboundEvent::from_value(&value) else {
            return;
        };
        if should_display(&event, self.state.identity()) {
            self.line(event.display_line());
        }
    }

    /// The provider transport closed — user-initiated or not, the same
    /// teardown runs: announce departure, notify, release the handle.
    fn handle_provider_closed(&mut self) {
        let identity = self.state.identity().map(str::to_string);
        if !self.state.closed() {
            return;
        }

        let farewell = encode("/disconnect", identity.as_deref());
        self.submit(RelayKind::Presence("disconnect"), farewell);

        self.line("Chat connection is now closed.");
        self.emit(UiEffect::Status(ConnectionPhase::Disconnected));
        self.emit(UiEffect::Controls(Controls::for_phase(
            ConnectionPhase::Disconnected,
        )));

        self.session = None;
        self.events = None;
        self.closed = None;
    }

    fn handle_relay_outcome(&mut self, kind: RelayKind, result: Result<Value, RelayError>) {
        match (kind, result) {
            (RelayKind::UserMessage(text), Ok(ack)) => {
                self.line(format!("You: {text}"));
                if let Some(event) = InboundEvent::from_value(&ack) {
                    if should_display(&event, self.state.identity()) {
                        self.line(event.display_line());
                    }
                }
                self.emit(UiEffect::ClearMessageInput);
            }
            (RelayKind::UserMessage(_), Err(err)) => {
                warn!(target: "bonfire::relay", error = %err, "message submission failed");
                self.line("Message could not be delivered.");
            }
            (RelayKind::Presence(which), Ok(_)) => {
                debug!(target: "bonfire::relay", command = which, "presence announcement delivered");
            }
            (RelayKind::Presence(which), Err(err)) => {
                warn!(target: "bonfire::relay", command = which, error = %err, "presence announcement failed");
            }
        }
    }

    fn submit(&self, kind: RelayKind, command: Command) {
        let relay = self.relay.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = relay.submit(&command).await;
            let _ = tx.send(InternalEvent::RelayOutcome { kind, result });
        });
    }

    fn line(&self, text: impl Into<String>) {
        self.emit(UiEffect::Line(text.into()));
    }

    fn emit(&self, effect: UiEffect) {
        let _ = self.effects.send(effect);
    }
}

enum Next {
    Internal(InternalEvent),
    Inbound(Option<Value>),
    Closed,
}

async fn recv_or_pend(events: &mut Option<EventStream>) -> Option<Value> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn closed_or_pend(closed: &mut Option<ClosedSignal>) {
    match closed.as_mut() {
        Some(signal) => signal.wait().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{MockProvider, MockSessionDriver};
    use crate::relay::testing::RecordingRelayBackend;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        controller: ChatController,
        effects: mpsc::UnboundedReceiver<UiEffect>,
        provider: MockProvider,
        backend: Arc<RecordingRelayBackend>,
    }

    fn fixture() -> Fixture {
        let provider = MockProvider::new();
        let backend = Arc::new(RecordingRelayBackend::new());
        let relay = RelayClient::with_backend(
            Url::parse("http://chat.test/api/send-message").unwrap(),
            backend.clone(),
        );
        let (controller, effects) = ChatController::new(
            Url::parse("http://chat.test/api/realtime-token-request").unwrap(),
            "chat",
            Arc::new(provider.clone()),
            relay,
        );
        Fixture {
            controller,
            effects,
            provider,
            backend,
        }
    }

    fn drain(effects: &mut mpsc::UnboundedReceiver<UiEffect>) -> Vec<UiEffect> {
        let mut seen = Vec::new();
        while let Ok(effect) = effects.try_recv() {
            seen.push(effect);
        }
        seen
    }

    /// Pumps controller events until `done` is satisfied, with a hard
    /// timeout so a wedged controller fails the test instead of hanging it.
    /// Returns every effect observed along the way.
    async fn pump_until(
        fixture: &mut Fixture,
        done: impl Fn(&[UiEffect], &ChatController) -> bool,
    ) -> Vec<UiEffect> {
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                seen.extend(drain(&mut fixture.effects));
                if done(&seen, &fixture.controller) {
                    return;
                }
                let event = fixture.controller.next_event().await;
                fixture.controller.handle_event(event);
            }
        })
        .await
        .expect("controller made no progress");
        seen
    }

    /// Connects as `identity` and waits for the `/connect` announcement to
    /// land at the relay, so each test starts from a settled session.
    async fn connect(fixture: &mut Fixture, identity: &str) -> MockSessionDriver {
        let driver = fixture.provider.arm_session();
        driver.establish();
        fixture.controller.attempt_connect(identity);
        let backend = fixture.backend.clone();
        pump_until(fixture, move |_, controller| {
            controller.phase() == ConnectionPhase::Connected && !backend.commands().is_empty()
        })
        .await;
        driver
    }

    #[tokio::test]
    async fn connecting_announces_presence_and_subscribes_the_channel() {
        let mut fixture = fixture();
        let driver = connect(&mut fixture, "alice").await;

        assert_eq!(fixture.controller.identity(), Some("alice"));
        assert_eq!(driver.subscribed_channel(), Some("chat".to_string()));

        let commands = fixture.backend.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "connect");
        assert_eq!(commands[0].params, None);
        assert_eq!(commands[0].sender.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn connect_effects_arrive_in_widget_order() {
        let mut fixture = fixture();
        let driver = fixture.provider.arm_session();
        driver.establish();
        fixture.controller.attempt_connect("alice");
        let effects = pump_until(&mut fixture, |_, controller| {
            controller.phase() == ConnectionPhase::Connected
        })
        .await;

        assert!(effects.contains(&UiEffect::Status(ConnectionPhase::Connecting)));
        assert!(effects.contains(&UiEffect::Line("You are now connected to chat.".into())));
        assert!(effects.contains(&UiEffect::Status(ConnectionPhase::Connected)));
        assert!(effects.contains(&UiEffect::Controls(Controls {
            identity_input: false,
            connect: false,
            close: true,
        })));
        assert!(effects.contains(&UiEffect::ClearIdentityInput));
        assert!(effects.contains(&UiEffect::Line("Nickname set to alice.".into())));
    }

    #[tokio::test]
    async fn connect_without_identity_is_refused_with_a_notice() {
        let mut fixture = fixture();
        fixture.controller.attempt_connect("   ");

        assert_eq!(fixture.controller.phase(), ConnectionPhase::Disconnected);
        assert_eq!(fixture.provider.connect_calls(), 0);
        let effects = drain(&mut fixture.effects);
        assert_eq!(
            effects,
            vec![UiEffect::Line("You need a nickname to connect to chat".into())]
        );
    }

    #[tokio::test]
    async fn connect_while_already_active_is_a_silent_no_op() {
        let mut fixture = fixture();
        let driver = fixture.provider.arm_session();
        fixture.controller.attempt_connect("alice");
        assert_eq!(fixture.controller.phase(), ConnectionPhase::Connecting);

        // second attempt while still connecting: no state change, no
        // duplicate session, nothing displayed
        fixture.controller.attempt_connect("alice");
        assert_eq!(fixture.controller.phase(), ConnectionPhase::Connecting);
        let effects = drain(&mut fixture.effects);
        assert!(!effects
            .iter()
            .any(|effect| matches!(effect, UiEffect::Line(_))));

        driver.establish();
        pump_until(&mut fixture, |_, controller| {
            controller.phase() == ConnectionPhase::Connected
        })
        .await;
        assert_eq!(fixture.provider.connect_calls(), 1);

        fixture.controller.attempt_connect("alice");
        assert_eq!(fixture.provider.connect_calls(), 1);
    }

    #[tokio::test]
    async fn failed_connection_attempts_reset_to_disconnected() {
        let mut fixture = fixture();
        fixture.provider.arm_failure("token endpoint unreachable");
        fixture.controller.attempt_connect("alice");

        let effects = pump_until(&mut fixture, |_, controller| {
            controller.phase() == ConnectionPhase::Disconnected
        })
        .await;
        assert!(effects.contains(&UiEffect::Line("Unable to reach the chat service.".into())));
        assert_eq!(fixture.controller.identity(), None);

        // the service is reachable again: a fresh attempt works
        let driver = fixture.provider.arm_session();
        driver.establish();
        fixture.controller.attempt_connect("alice");
        pump_until(&mut fixture, |_, controller| {
            controller.phase() == ConnectionPhase::Connected
        })
        .await;
    }

    #[tokio::test]
    async fn sending_while_disconnected_is_refused_with_a_notice() {
        let mut fixture = fixture();
        fixture.controller.send_user_message("hello");

        let effects = drain(&mut fixture.effects);
        assert_eq!(
            effects,
            vec![UiEffect::Line("You are not connected to the chat.".into())]
        );
        assert!(fixture.backend.commands().is_empty());
    }

    #[tokio::test]
    async fn sent_messages_echo_and_clear_the_input_on_acknowledgement() {
        let mut fixture = fixture();
        connect(&mut fixture, "alice").await;

        fixture.controller.send_user_message("hello");
        let effects = pump_until(&mut fixture, |seen, _| {
            seen.contains(&UiEffect::ClearMessageInput)
        })
        .await;

        assert!(effects.contains(&UiEffect::Line("You: hello".into())));
        // the echo acknowledgement carries our own nickname: suppressed
        assert!(!effects.contains(&UiEffect::Line("alice: hello".into())));

        let commands = fixture.backend.commands();
        let message = commands.iter().find(|c| c.name == "message").unwrap();
        assert_eq!(
            message.params.as_ref().unwrap().get("message").unwrap(),
            "hello"
        );
        assert_eq!(message.sender.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn relay_acknowledgements_from_others_are_displayed() {
        let mut fixture = fixture();
        connect(&mut fixture, "alice").await;

        fixture
            .backend
            .script(Ok(json!({ "data": "welcome alice", "origin": "server" })));
        fixture.controller.send_user_message("hello");
        let effects = pump_until(&mut fixture, |seen, _| {
            seen.contains(&UiEffect::ClearMessageInput)
        })
        .await;

        assert!(effects.contains(&UiEffect::Line("You: hello".into())));
        assert!(effects.contains(&UiEffect::Line("Server: welcome alice".into())));
    }

    #[tokio::test]
    async fn failed_sends_notify_without_touching_the_connection() {
        let mut fixture = fixture();
        connect(&mut fixture, "alice").await;

        fixture.backend.script(Err(RelayError::HttpStatus(
            reqwest::StatusCode::BAD_GATEWAY,
        )));
        fixture.controller.send_user_message("hello");
        let effects = pump_until(&mut fixture, |seen, _| {
            seen.contains(&UiEffect::Line("Message could not be delivered.".into()))
        })
        .await;

        assert_eq!(fixture.controller.phase(), ConnectionPhase::Connected);
        assert!(!effects.contains(&UiEffect::ClearMessageInput));
    }

    #[tokio::test]
    async fn inbound_channel_events_are_decoded_filtered_and_rendered() {
        let mut fixture = fixture();
        let driver = connect(&mut fixture, "alice").await;

        driver.emit(json!({ "data": "hi", "nickname": "bob", "origin": "peer" }));
        driver.emit(json!({ "data": "mine", "nickname": "alice", "origin": "peer" }));
        driver.emit(json!("{not json"));
        driver.emit(json!({ "data": "maintenance at noon" }));

        let effects = pump_until(&mut fixture, |seen, _| {
            seen.contains(&UiEffect::Line("Server: maintenance at noon".into()))
        })
        .await;

        assert!(effects.contains(&UiEffect::Line("bob: hi".into())));
        // self-echo suppressed
        assert!(!effects.contains(&UiEffect::Line("alice: mine".into())));
    }

    #[tokio::test]
    async fn nick_command_updates_the_identity_mid_session() {
        let mut fixture = fixture();
        let driver = connect(&mut fixture, "alice").await;

        fixture.controller.send_user_message("/nick emil");
        assert_eq!(fixture.controller.identity(), Some("emil"));
        let backend = fixture.backend.clone();
        pump_until(&mut fixture, move |_, _| backend.commands().len() >= 2).await;
        let commands = fixture.backend.commands();
        let nick = commands.iter().find(|c| c.name == "nick").unwrap();
        assert_eq!(
            nick.params.as_ref().unwrap().get("nickname").unwrap(),
            "emil"
        );
        // the command still carries the identity it was encoded under
        assert_eq!(nick.sender.as_deref(), Some("alice"));

        // events for the old identity now display; the new one is suppressed
        driver.emit(json!({ "data": "one", "nickname": "alice", "origin": "peer" }));
        driver.emit(json!({ "data": "two", "nickname": "emil", "origin": "peer" }));
        driver.emit(json!({ "data": "done", "nickname": "bob", "origin": "peer" }));
        let effects = pump_until(&mut fixture, |seen, _| {
            seen.contains(&UiEffect::Line("bob: done".into()))
        })
        .await;
        assert!(effects.contains(&UiEffect::Line("alice: one".into())));
        assert!(!effects.contains(&UiEffect::Line("emil: two".into())));
    }

    #[tokio::test]
    async fn bare_nick_clears_the_identity() {
        let mut fixture = fixture();
        connect(&mut fixture, "alice").await;

        fixture.controller.send_user_message("/nick");
        assert_eq!(fixture.controller.identity(), None);
    }

    #[tokio::test]
    async fn user_close_tears_down_when_the_provider_confirms() {
        let mut fixture = fixture();
        let driver = connect(&mut fixture, "alice").await;

        fixture.controller.close_connection();
        assert!(driver.close_requested());
        let backend = fixture.backend.clone();
        let effects = pump_until(&mut fixture, move |_, controller| {
            controller.phase() == ConnectionPhase::Disconnected
                && backend.commands().iter().any(|c| c.name == "disconnect")
        })
        .await;

        assert!(effects.contains(&UiEffect::Line("Closing chat.".into())));
        assert!(effects.contains(&UiEffect::Status(ConnectionPhase::Closing)));
        assert!(effects.contains(&UiEffect::Line("Chat connection is now closed.".into())));
        assert!(effects.contains(&UiEffect::Controls(Controls {
            identity_input: true,
            connect: true,
            close: false,
        })));

        // the departure announcement went out with the old identity
        let commands = fixture.backend.commands();
        let farewell = commands.iter().find(|c| c.name == "disconnect").unwrap();
        assert_eq!(farewell.sender.as_deref(), Some("alice"));
        assert_eq!(fixture.controller.identity(), None);
    }

    #[tokio::test]
    async fn provider_initiated_closure_runs_the_same_teardown() {
        let mut fixture = fixture();
        let driver = connect(&mut fixture, "alice").await;

        driver.close();
        let backend = fixture.backend.clone();
        let effects = pump_until(&mut fixture, move |_, controller| {
            controller.phase() == ConnectionPhase::Disconnected
                && backend.commands().iter().any(|c| c.name == "disconnect")
        })
        .await;

        assert!(effects.contains(&UiEffect::Line("Chat connection is now closed.".into())));
        assert!(effects.contains(&UiEffect::Status(ConnectionPhase::Disconnected)));
    }

    #[tokio::test]
    async fn close_while_disconnected_is_refused_with_a_notice() {
        let mut fixture = fixture();
        fixture.controller.close_connection();
        let effects = drain(&mut fixture.effects);
        assert_eq!(
            effects,
            vec![UiEffect::Line("Chat connection is already closed".into())]
        );
    }

    #[tokio::test]
    async fn close_during_establishment_still_tears_down_cleanly() {
        let mut fixture = fixture();
        let driver = fixture.provider.arm_session();
        fixture.controller.attempt_connect("alice");
        fixture.controller.close_connection();
        assert_eq!(fixture.controller.phase(), ConnectionPhase::Closing);

        driver.establish();
        pump_until(&mut fixture, |_, controller| {
            controller.phase() == ConnectionPhase::Disconnected
        })
        .await;
        assert!(driver.close_requested());
    }
}
