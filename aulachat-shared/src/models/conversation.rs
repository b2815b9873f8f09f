use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserProfile;

/// Where a conversation was started from.
///
/// A conversation is always between two users, but it can be anchored to
/// the platform context in which it began: a class, a content block, or
/// nothing in particular.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationContext {
    General,
    Class,
    Block,
}

impl ConversationContext {
    /// Canonical string stored in the `context_type` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Class => "class",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for ConversationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationContext {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "general" => Ok(Self::General),
            "class" => Ok(Self::Class),
            "block" => Ok(Self::Block),
            _ => Err("unknown conversation context"),
        }
    }
}

/// A two-party conversation.
///
/// Conversations are never hard-deleted; `is_active` is flipped off
/// instead. At most one active conversation exists per unordered pair of
/// participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub context_type: ConversationContext,
    /// The class or block this conversation is anchored to, if any.
    pub context_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// The participant that is not `user_id`.
    ///
    /// Returns `None` when `user_id` is not a participant at all.
    #[must_use]
    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user1_id == user_id {
            Some(self.user2_id)
        } else if self.user2_id == user_id {
            Some(self.user1_id)
        } else {
            None
        }
    }

    /// Whether `user_id` is one of the two participants.
    #[must_use]
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }
}

/// One entry in a user's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub peer: UserProfile,
    pub context_type: ConversationContext,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub is_peer_online: bool,
    pub archived: bool,
    pub muted: bool,
    pub pinned: bool,
}

/// Request body for the create-or-get conversation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub recipient_id: Uuid,
    #[serde(default = "default_context")]
    pub context_type: ConversationContext,
    #[serde(default)]
    pub context_id: Option<Uuid>,
}

fn default_context() -> ConversationContext {
    ConversationContext::General
}

/// Per-participant conversation settings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSettings {
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub pinned: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(user1: Uuid, user2: Uuid) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            user1_id: user1,
            user2_id: user2,
            context_type: ConversationContext::General,
            context_id: None,
            is_active: true,
            created_at: Utc::now(),
            last_message_at: None,
        }
    }

    #[test]
    fn peer_of_returns_the_other_participant() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let convo = conversation(a, b);

        assert_eq!(convo.peer_of(a), Some(b));
        assert_eq!(convo.peer_of(b), Some(a));
        assert_eq!(convo.peer_of(Uuid::new_v4()), None);
    }

    #[test]
    fn context_round_trips_through_str() {
        for context in [
            ConversationContext::General,
            ConversationContext::Class,
            ConversationContext::Block,
        ] {
            assert_eq!(context.as_str().parse(), Ok(context));
        }
        assert!("quiz".parse::<ConversationContext>().is_err());
    }

    #[test]
    fn create_request_defaults_to_general_context() {
        let json = format!(r#"{{"recipientId":"{}"}}"#, Uuid::new_v4());
        let request: CreateConversationRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.context_type, ConversationContext::General);
        assert!(request.context_id.is_none());
    }
}
