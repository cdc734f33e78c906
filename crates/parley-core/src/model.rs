use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{MessageId, UserId};

/// The logged-in user, as assigned by the backend on login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
}

/// One user in the roster snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: UserId,
    pub username: String,
}

impl RosterEntry {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

impl From<&Identity> for RosterEntry {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
        }
    }
}

/// A chat message. Sender and receiver are ids, resolved against the roster when rendered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// True when this message belongs to the conversation between `a` and `b`,
    /// in either direction.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == b && self.receiver_id == a) || (self.sender_id == a && self.receiver_id == b)
    }
}

/// Frame the client writes on the push channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub receiver_id: UserId,
    pub content: String,
}

/// The (identity, peer) pairing a fetch or a channel handler was issued for.
///
/// `epoch` increases on every peer or identity change, so two scopes for the same
/// pair issued at different times still compare unequal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConversationScope {
    pub self_id: UserId,
    pub peer_id: UserId,
    pub epoch: u64,
}

impl ConversationScope {
    pub fn includes(&self, message: &Message) -> bool {
        message.is_between(self.self_id, self.peer_id)
    }
}

/// Accepts RFC 3339 as well as the zone-less ISO form the backend emits
/// (`2025-01-01T10:00:00.123456`), which is read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
}
