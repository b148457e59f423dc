//! Stream message envelope.
//!
//! Client messages are tagged JSON objects. Server messages are only
//! inspected for their `type`; domain payloads (`transcript`, `facts`,
//! `usage`, ...) are passed through untouched.

use serde::{Deserialize, Serialize};

/// Messages from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Stream configuration, sent after every open.
    Config {
        configuration: serde_json::Value,
    },
    /// Ask the server to emit results for audio received so far.
    Flush,
    /// Signal that no more audio follows.
    End,
}

/// Server message types the session reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessageKind {
    ConfigAccepted,
    ConfigDenied,
    ConfigTimeout,
    Error,
    Ended,
    /// Any other type, e.g. `transcript`.
    Other(String),
}

impl ServerMessageKind {
    fn from_type(kind: &str) -> Self {
        match kind {
            "CONFIG_ACCEPTED" => Self::ConfigAccepted,
            "CONFIG_DENIED" => Self::ConfigDenied,
            "CONFIG_TIMEOUT" => Self::ConfigTimeout,
            "error" => Self::Error,
            "ended" => Self::Ended,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Read the `type` of a server text frame. `None` for non-JSON or untyped frames.
pub fn message_kind(text: &str) -> Option<ServerMessageKind> {
    serde_json::from_str::<Envelope>(text)
        .ok()
        .map(|envelope| ServerMessageKind::from_type(&envelope.kind))
}
