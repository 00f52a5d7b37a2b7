//! Core data models for the match chat client.
//!
//! Chat messages and topic identifiers travel over the real-time channel;
//! match and profile records come from the REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Topic
// =============================================================================

/// Identifier of a match chat room.
///
/// The server keys rooms by numeric match id, so a purely numeric topic is
/// written to the wire as a JSON number. Both numbers and strings are
/// accepted when reading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicId(String);

impl TopicId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Topic from user input (a CLI argument, an env var). Surrounding
    /// whitespace is dropped; blank input is no topic at all.
    pub fn parse_input(raw: &str) -> Option<Self> {
        let id = raw.trim();
        (!id.is_empty()).then(|| Self::new(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a match number, if it is one in canonical form.
    pub fn as_match_number(&self) -> Option<u64> {
        let n: u64 = self.0.parse().ok()?;
        (n.to_string() == self.0).then_some(n)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TopicId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for TopicId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl Serialize for TopicId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_match_number() {
            Some(n) => serializer.serialize_u64(n),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for TopicId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self::from(n),
            Raw::Text(s) => Self(s),
        })
    }
}

// =============================================================================
// Chat Models
// =============================================================================

/// A single chat line in a match room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(rename = "matchId")]
    pub topic_id: TopicId,
    #[serde(rename = "user")]
    pub author: String,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a locally authored message with a fresh client-side id.
    pub fn local(topic_id: TopicId, author: &str, body: &str) -> Self {
        Self {
            id: new_message_id(),
            topic_id,
            author: author.to_string(),
            body: body.to_string(),
            sent_at: Utc::now(),
        }
    }
}

/// Client-assigned message id, e.g. `msg_3f2a...`.
pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

/// Delivery status of a stored message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Optimistic local echo, not yet relayed back by the server.
    Pending,
    /// Relayed by the server.
    #[default]
    Confirmed,
    /// The connection refused the outgoing frame.
    Failed,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Match Models
// =============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Scheduled,
    Live,
    Finished,
    #[serde(other)]
    Unknown,
}

/// A match as listed by the scores API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub id: u64,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub home_score: u32,
    #[serde(default)]
    pub away_score: u32,
    #[serde(default)]
    pub status: MatchStatus,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub league: String,
    #[serde(default)]
    pub date: String,
    /// Current minute, only present for live matches.
    #[serde(default)]
    pub minute: Option<u32>,
}

impl MatchSummary {
    pub fn is_live(&self) -> bool {
        self.status == MatchStatus::Live
    }

    pub fn topic(&self) -> TopicId {
        TopicId::from(self.id)
    }

    /// Room title, e.g. "Liverpool vs Arsenal".
    pub fn title(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }

    pub fn scoreline(&self) -> String {
        format!("{} - {}", self.home_score, self.away_score)
    }
}

/// The logged-in user, as returned by the profile endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl UserProfile {
    /// Name shown next to this user's chat lines.
    pub fn display_name(&self) -> &str {
        if self.nickname.trim().is_empty() {
            &self.username
        } else {
            &self.nickname
        }
    }
}
