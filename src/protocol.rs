//! Real-time event protocol.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.
//! Outbound frames are built from [`ClientEvent`]; inbound frames are decoded
//! and validated into [`ServerEvent`] before anything else sees them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::data::models::{ChatMessage, TopicId};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid payload for {event}: {message}")]
    InvalidPayload { event: String, message: String },
}

/// Events this client emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SubscribeMatch(TopicId),
    UnsubscribeMatch(TopicId),
    ChatMessage(ChatMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubscribeMatch(_) => "subscribe_match",
            Self::UnsubscribeMatch(_) => "unsubscribe_match",
            Self::ChatMessage(_) => "chat_message",
        }
    }
}

/// Events the server pushes to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(ChatMessage),
    /// Backlog, sent once per subscription.
    ChatHistory(Vec<ChatMessage>),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::ChatHistory(_) => EventKind::ChatHistory,
        }
    }
}

/// Inbound event names a handler can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    ChatHistory,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::ChatHistory => "chat_history",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_message" => Ok(Self::NewMessage),
            "chat_history" => Ok(Self::ChatHistory),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Serialize an outbound event into a text frame.
pub fn encode_client_event(event: &ClientEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode and validate an inbound text frame.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind: EventKind = envelope.event.parse()?;
    let invalid = |message: String| ProtocolError::InvalidPayload {
        event: kind.to_string(),
        message,
    };

    let event = match kind {
        EventKind::NewMessage => {
            let msg: ChatMessage =
                serde_json::from_value(envelope.data).map_err(|e| invalid(e.to_string()))?;
            validate_message(&msg).map_err(invalid)?;
            ServerEvent::NewMessage(msg)
        }
        EventKind::ChatHistory => {
            let history: Vec<ChatMessage> =
                serde_json::from_value(envelope.data).map_err(|e| invalid(e.to_string()))?;
            for msg in &history {
                validate_message(msg).map_err(invalid)?;
            }
            ServerEvent::ChatHistory(history)
        }
    };

    Ok(event)
}

fn validate_message(msg: &ChatMessage) -> Result<(), String> {
    if msg.id.trim().is_empty() {
        return Err("message id is empty".to_string());
    }
    if msg.topic_id.as_str().is_empty() {
        return Err(format!("message {} has no match id", msg.id));
    }
    Ok(())
}
