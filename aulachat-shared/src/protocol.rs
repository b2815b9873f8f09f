//! The realtime wire protocol.
//!
//! Every frame on the WebSocket is a JSON object of the shape
//! `{ "event": <name>, "data": <payload> }`. Both directions are closed
//! tagged unions, so a handler matching on [`ClientEvent`] or
//! [`ServerEvent`] is exhaustively checked at compile time; there is no
//! string-keyed dispatch anywhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, UserStatus};

/// Events a client may send over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation(Uuid),
    LeaveConversation(Uuid),
    TypingStart(ConversationRef),
    TypingStop(ConversationRef),
    MarkRead(MarkReadPayload),
    MarkConversationRead(ConversationRef),
    RequestUserStatus(Uuid),
}

/// Events the server pushes to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(Message),
    UserTyping(TypingBroadcast),
    MessageRead(MessageReadBroadcast),
    ConversationRead(ConversationReadBroadcast),
    UserStatusChange(UserStatus),
    UserStatusResponse(UserStatus),
    UserJoinedConversation(RoomMembershipBroadcast),
    UserLeftConversation(RoomMembershipBroadcast),
    Error(ErrorPayload),
}

impl ServerEvent {
    /// The wire-level event name, for logging and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::UserTyping(_) => "user_typing",
            Self::MessageRead(_) => "message_read",
            Self::ConversationRead(_) => "conversation_read",
            Self::UserStatusChange(_) => "user_status_change",
            Self::UserStatusResponse(_) => "user_status_response",
            Self::UserJoinedConversation(_) => "user_joined_conversation",
            Self::UserLeftConversation(_) => "user_left_conversation",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingBroadcast {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub nickname: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadBroadcast {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub read_by: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReadBroadcast {
    pub conversation_id: Uuid,
    pub read_by: Uuid,
    pub message_count: i64,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembershipBroadcast {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}
