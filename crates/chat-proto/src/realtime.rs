//! Frames exchanged over the realtime socket. The client only ever attaches
//! to a channel and keeps the connection alive; all publishing goes through
//! the HTTP relay, so the event flow here is strictly server-to-client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent by the client after the socket opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe to a named channel.
    Attach { channel: String },
    /// Keepalive.
    Ping,
}

/// Frames sent by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The session is authenticated and transport-ready.
    Connected { connection_id: String },
    /// An attach request was accepted.
    Attached { channel: String },
    /// A message published on a channel. `data` is the opaque event
    /// payload handed to the codec untouched.
    Event { channel: String, data: Value },
    /// A recoverable service-side complaint.
    Error { message: String },
    Pong,
}
