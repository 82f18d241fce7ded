//! Message shapes shared between the bonfire client, the relay endpoint and
//! the realtime socket, plus the codec that turns a raw input line into a
//! structured command and an inbound payload into a displayable event.
//! Keeping these in a leaf crate keeps the client and any future service
//! implementation in sync without copying shapes across crates.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub mod realtime;

/// Matches '/[COMMAND] [VALUE]', e.g. `/nick emil`.
static COMMAND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/([A-Za-z]+)\s*(\w*)").expect("command pattern compiles"));

/// A structured outbound instruction submitted to the relay.
///
/// Serializes as `{"command": ..., "params": {...}, "sender": ...}`;
/// `params` and `sender` are omitted entirely when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "command")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl Command {
    /// The nickname a `nick` command carries, possibly empty (an empty
    /// capture clears the identity). `None` for every other command.
    /// The caller owns the identity and applies this right after encoding.
    pub fn nickname_change(&self) -> Option<&str> {
        if self.name != "nick" {
            return None;
        }
        Some(
            self.params
                .as_ref()
                .and_then(|params| params.get("nickname"))
                .map(String::as_str)
                .unwrap_or(""),
        )
    }
}

/// Converts a free-text input line into a [`Command`]. Never fails: input
/// that does not look like a slash command degrades to a `message` command
/// carrying the raw line.
pub fn encode(raw_input: &str, current_identity: Option<&str>) -> Command {
    let sender = current_identity.map(str::to_string);

    if let Some(caps) = COMMAND_PATTERN.captures(raw_input.trim()) {
        let word = &caps[1];
        if word == "nick" {
            let nickname = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            return Command {
                name: "nick".to_string(),
                params: Some(HashMap::from([(
                    "nickname".to_string(),
                    nickname.to_string(),
                )])),
                sender,
            };
        }
        return Command {
            name: word.to_string(),
            params: None,
            sender,
        };
    }

    Command {
        name: "message".to_string(),
        params: Some(HashMap::from([(
            "message".to_string(),
            raw_input.to_string(),
        )])),
        sender,
    }
}

/// A structured event received from the channel or the relay acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub data: String,
    pub nickname: String,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Server,
    Peer,
}

/// Raw inbound shape before field-presence defaults are applied. An empty
/// `nickname` or `origin` counts as absent, matching the service contract.
#[derive(Debug, Deserialize)]
struct RawInbound {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    origin: Option<String>,
}

impl InboundEvent {
    /// Parses a serialized payload. Fails soft: a malformed payload yields
    /// `None` and a diagnostic, never an error the caller has to handle.
    pub fn from_json_str(raw: &str) -> Option<InboundEvent> {
        match serde_json::from_str::<RawInbound>(raw) {
            Ok(parsed) => Some(Self::from_raw(parsed)),
            Err(err) => {
                warn!(target: "chat_proto::decode", error = %err, "discarding malformed inbound payload");
                None
            }
        }
    }

    /// Parses a pre-parsed payload. A JSON string recurses into
    /// [`InboundEvent::from_json_str`] so double-encoded payloads decode the
    /// same way either entry point is reached.
    pub fn from_value(value: &Value) -> Option<InboundEvent> {
        if let Value::String(raw) = value {
            return Self::from_json_str(raw);
        }
        match serde_json::from_value::<RawInbound>(value.clone()) {
            Ok(parsed) => Some(Self::from_raw(parsed)),
            Err(err) => {
                warn!(target: "chat_proto::decode", error = %err, "discarding malformed inbound payload");
                None
            }
        }
    }

    fn from_raw(raw: RawInbound) -> InboundEvent {
        let nickname = match raw.nickname {
            Some(nick) if !nick.is_empty() => nick,
            _ => "anonymous".to_string(),
        };
        let origin = match raw.origin.as_deref() {
            None | Some("") | Some("server") => Origin::Server,
            Some(_) => Origin::Peer,
        };
        InboundEvent {
            data: raw.data.unwrap_or_default(),
            nickname,
            origin,
        }
    }

    /// The transcript line for this event: `Server: <data>` for
    /// server-originated events, `<nickname>: <data>` otherwise.
    pub fn display_line(&self) -> String {
        match self.origin {
            Origin::Server => format!("Server: {}", self.data),
            Origin::Peer => format!("{}: {}", self.nickname, self.data),
        }
    }
}

/// Whether an event should reach the transcript: empty payloads and the
/// user's own echoed messages are suppressed.
pub fn should_display(event: &InboundEvent, current_identity: Option<&str>) -> bool {
    !event.data.is_empty() && current_identity != Some(event.nickname.as_str())
}
