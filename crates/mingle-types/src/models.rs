use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of a chat message.
///
/// Transitions are monotonic: `Sent` -> `Delivered` -> `Seen`, never backwards.
/// `Delivered` is signaled to the sender but not written to the store, so
/// persisted rows only ever hold `Sent` or `Seen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "seen" => Ok(Self::Seen),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

/// A direct chat message, as stored and as pushed to clients.
/// Sender and recipient ids reference the external user store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: String,
    pub sender_username: String,
    pub recipient_id: String,
    pub text: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// A push notification. Constructed on demand, pushed to the target user's
/// live connections, then discarded — persistence belongs to the REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub reference_id: Option<String>,
    /// Stamped at construction time, never client-supplied.
    pub timestamp: DateTime<Utc>,
}
