use async_trait::async_trait;
use chat_proto::realtime::{ClientFrame, ServerFrame};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{ClosedSignal, EventStream, ProviderError, ProviderSession, RealtimeProvider};

const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Production realtime provider: fetches a short-lived token from the auth
/// endpoint, opens a websocket to the service and pumps frames through
/// channel plumbing owned by the returned session.
pub struct WebSocketProvider {
    realtime_url: Url,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

impl WebSocketProvider {
    pub fn new(realtime_url: Url) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .build()?;
        Ok(Self { realtime_url, http })
    }
}

#[async_trait]
impl RealtimeProvider for WebSocketProvider {
    async fn connect(&self, auth_url: &Url) -> Result<Box<dyn ProviderSession>, ProviderError> {
        let attempt = Uuid::new_v4();
        debug!(
            target: "bonfire::provider",
            attempt = %attempt,
            auth_url = %auth_url,
            "requesting realtime token"
        );
        let response = self.http.get(auth_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::TokenStatus(response.status()));
        }
        let token = response.json::<TokenResponse>().await?.token;

        let mut socket_url = self.realtime_url.clone();
        socket_url
            .query_pairs_mut()
            .append_pair("access_token", &token);
        let (ws_stream, _) = connect_async(socket_url.as_str()).await?;
        debug!(target: "bonfire::provider", attempt = %attempt, "websocket open");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (established_tx, established_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let pump = tokio::spawn(run_socket(
            ws_stream,
            command_rx,
            established_tx,
            events_tx,
            closed_tx,
        ));

        let heartbeat_tx = command_tx.clone();
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if heartbeat_tx
                    .send(SocketCommand::Frame(ClientFrame::Ping))
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(Box::new(WebSocketSession {
            commands: command_tx,
            established: Some(established_rx),
            events: Some(events_rx),
            closed: closed_rx,
            pump: Some(pump),
            heartbeat: Some(heartbeat),
        }))
    }
}

enum SocketCommand {
    Frame(ClientFrame),
    Close,
}

struct WebSocketSession {
    commands: mpsc::UnboundedSender<SocketCommand>,
    established: Option<oneshot::Receiver<Result<String, String>>>,
    events: Option<EventStream>,
    closed: watch::Receiver<bool>,
    pump: Option<tokio::task::JoinHandle<()>>,
    heartbeat: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl ProviderSession for WebSocketSession {
    async fn wait_established(&mut self) -> Result<(), ProviderError> {
        let rx = self
            .established
            .take()
            .ok_or_else(|| ProviderError::Establish("established signal already consumed".into()))?;
        match tokio::time::timeout(ESTABLISH_TIMEOUT, rx).await {
            Ok(Ok(Ok(connection_id))) => {
                debug!(
                    target: "bonfire::provider",
                    connection_id = %connection_id,
                    "realtime session established"
                );
                Ok(())
            }
            Ok(Ok(Err(reason))) => Err(ProviderError::Rejected(reason)),
            Ok(Err(_)) => Err(ProviderError::Establish(
                "socket closed during handshake".into(),
            )),
            Err(_) => Err(ProviderError::Establish(
                "timed out waiting for the connected frame".into(),
            )),
        }
    }

    fn subscribe(&mut self, channel: &str) -> Result<EventStream, ProviderError> {
        let events = self.events.take().ok_or(ProviderError::AlreadySubscribed)?;
        self.commands
            .send(SocketCommand::Frame(ClientFrame::Attach {
                channel: channel.to_string(),
            }))
            .map_err(|_| ProviderError::SessionClosed)?;
        Ok(events)
    }

    fn closed_signal(&self) -> ClosedSignal {
        ClosedSignal::new(self.closed.clone())
    }

    fn request_close(&self) {
        let _ = self.commands.send(SocketCommand::Close);
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        if let Some(task) = self.pump.take() {
            task.abort();
        }
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}

/// Owns the socket: forwards queued client frames out, routes server frames
/// to the established/event plumbing, and flips the closed flag on the way
/// out whatever ended the connection.
async fn run_socket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    established_tx: oneshot::Sender<Result<String, String>>,
    events_tx: mpsc::UnboundedSender<Value>,
    closed_tx: watch::Sender<bool>,
) {
    let (mut sender, mut receiver) = ws_stream.split();
    let mut established = Some(established_tx);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SocketCommand::Frame(frame)) => {
                    if let Ok(text) = serde_json::to_string(&frame) {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(SocketCommand::Close) => {
                    // Keep reading; the server's close completes the shutdown.
                    let _ = sender.send(Message::Close(None)).await;
                }
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&text, &mut established, &events_tx);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = closed_tx.send(true);
}

fn handle_frame(
    text: &str,
    established: &mut Option<oneshot::Sender<Result<String, String>>>,
    events_tx: &mpsc::UnboundedSender<Value>,
) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::Connected { connection_id }) => {
            if let Some(tx) = established.take() {
                let _ = tx.send(Ok(connection_id));
            }
        }
        Ok(ServerFrame::Attached { channel }) => {
            debug!(target: "bonfire::provider", channel = %channel, "channel attached");
        }
        Ok(ServerFrame::Event { data, .. }) => {
            let _ = events_tx.send(data);
        }
        Ok(ServerFrame::Error { message: reason }) => {
            if let Some(tx) = established.take() {
                let _ = tx.send(Err(reason));
            } else {
                warn!(target: "bonfire::provider", reason = %reason, "service reported an error");
            }
        }
        Ok(ServerFrame::Pong) => {}
        Err(err) => {
            debug!(target: "bonfire::provider", error = %err, "ignoring unparseable frame");
        }
    }
}
