use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttachment {
    /// Server-side storage name (opaque, collision-free).
    pub file_name: String,
    /// The name the sender uploaded the file under.
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// A direct message. Append-only; only `read_at` ever changes, and it is
/// set exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Derived at send time as "the other participant".
    pub recipient_id: Uuid,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    pub created_at: DateTime<Utc>,
    /// Null until the recipient reads the message.
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    #[must_use]
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// One page of a conversation's message history, newest-first cursor
/// pagination keyed on message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// Response body for the unread-count endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: i64,
}
