//! Conversation room membership.
//!
//! A room is the set of connections currently joined to one conversation.
//! Membership is per connection, not per user, so two tabs of the same
//! user can be joined independently. Access is checked against the
//! database through [`ConversationDirectory`] before a join succeeds.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::services::MessagingError;

use super::registry::ConnectionId;

/// A conversation paired with the other participant, as seen from one
/// user's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationPeer {
    pub conversation_id: Uuid,
    pub peer_id: Uuid,
}

/// Read-only view of conversation membership, backed by the database in
/// production and stubbed in tests.
#[async_trait]
pub trait ConversationDirectory: Send + Sync + fmt::Debug {
    /// Whether the user is one of the conversation's two participants.
    async fn is_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, MessagingError>;

    /// Every active conversation the user takes part in.
    async fn active_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationPeer>, MessagingError>;
}

#[derive(Default)]
struct RoomsInner {
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<Uuid>>,
}

/// Tracks which connections are joined to which conversation rooms.
pub struct RoomManager {
    inner: Mutex<RoomsInner>,
    directory: Arc<dyn ConversationDirectory>,
}

impl fmt::Debug for RoomManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomManager").finish_non_exhaustive()
    }
}

impl RoomManager {
    pub fn new(directory: Arc<dyn ConversationDirectory>) -> Self {
        Self {
            inner: Mutex::new(RoomsInner::default()),
            directory,
        }
    }

    /// The membership lookup behind this manager, for callers that need
    /// a fresh conversation list outside of a join.
    pub fn directory(&self) -> &Arc<dyn ConversationDirectory> {
        &self.directory
    }

    /// Joins a connection to a conversation room after verifying the
    /// user is a participant.
    ///
    /// Returns `false` when the connection was already in the room;
    /// repeated joins are harmless.
    ///
    /// # Errors
    /// `AccessDenied` when the user is not a participant of the
    /// conversation, or a database error from the membership lookup.
    pub async fn join(
        &self,
        conversation_id: Uuid,
        connection_id: ConnectionId,
        user_id: Uuid,
    ) -> Result<bool, MessagingError> {
        if !self
            .directory
            .is_participant(conversation_id, user_id)
            .await?
        {
            return Err(MessagingError::access_denied(
                "not a participant of this conversation",
            ));
        }

        Ok(self.insert(conversation_id, connection_id).await)
    }

    /// Joins a connection to every conversation the user is part of.
    /// Used once at connect time so pushes arrive without an explicit
    /// join from the client.
    pub async fn join_all_active(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
    ) -> Result<Vec<ConversationPeer>, MessagingError> {
        let conversations = self.directory.active_conversations(user_id).await?;
        for conversation in &conversations {
            self.insert(conversation.conversation_id, connection_id).await;
        }
        Ok(conversations)
    }

    async fn insert(&self, conversation_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut inner = self.inner.lock().await;
        let newly_joined = inner
            .rooms
            .entry(conversation_id)
            .or_default()
            .insert(connection_id);
        inner
            .joined
            .entry(connection_id)
            .or_default()
            .insert(conversation_id);
        newly_joined
    }

    /// Removes a connection from one room. Returns `false` if it was not
    /// in the room.
    pub async fn leave(&self, conversation_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut inner = self.inner.lock().await;

        let removed = match inner.rooms.get_mut(&conversation_id) {
            Some(members) => {
                let removed = members.remove(&connection_id);
                if members.is_empty() {
                    inner.rooms.remove(&conversation_id);
                }
                removed
            }
            None => false,
        };

        if let Some(joined) = inner.joined.get_mut(&connection_id) {
            joined.remove(&conversation_id);
            if joined.is_empty() {
                inner.joined.remove(&connection_id);
            }
        }

        removed
    }

    /// Removes a closed connection from every room it was joined to.
    /// Returns the rooms it left.
    pub async fn evict(&self, connection_id: ConnectionId) -> Vec<Uuid> {
        let mut inner = self.inner.lock().await;

        let Some(joined) = inner.joined.remove(&connection_id) else {
            return Vec::new();
        };

        for conversation_id in &joined {
            if let Some(members) = inner.rooms.get_mut(conversation_id) {
                members.remove(&connection_id);
                if members.is_empty() {
                    inner.rooms.remove(conversation_id);
                }
            }
        }

        joined.into_iter().collect()
    }

    /// Connections currently joined to a room.
    pub async fn members(&self, conversation_id: Uuid) -> Vec<ConnectionId> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(&conversation_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct StubDirectory {
        memberships: Vec<(Uuid, Uuid)>,
    }

    #[async_trait]
    impl ConversationDirectory for StubDirectory {
        async fn is_participant(
            &self,
            conversation_id: Uuid,
            user_id: Uuid,
        ) -> Result<bool, MessagingError> {
            Ok(self.memberships.contains(&(conversation_id, user_id)))
        }

        async fn active_conversations(
            &self,
            user_id: Uuid,
        ) -> Result<Vec<ConversationPeer>, MessagingError> {
            Ok(self
                .memberships
                .iter()
                .filter(|(_, member)| *member == user_id)
                .map(|(conversation_id, _)| ConversationPeer {
                    conversation_id: *conversation_id,
                    peer_id: Uuid::new_v4(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn join_rejects_non_participants() {
        let conversation_id = Uuid::new_v4();
        let member = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let rooms = RoomManager::new(Arc::new(StubDirectory {
            memberships: vec![(conversation_id, member)],
        }));
        let connection_id = ConnectionId::new();

        assert!(rooms.join(conversation_id, connection_id, member).await.unwrap());
        let denied = rooms
            .join(conversation_id, ConnectionId::new(), outsider)
            .await;
        assert!(matches!(denied, Err(MessagingError::AccessDenied(_))));
        assert_eq!(rooms.members(conversation_id).await, vec![connection_id]);
    }

    #[tokio::test]
    async fn join_is_idempotent_per_connection() {
        let conversation_id = Uuid::new_v4();
        let member = Uuid::new_v4();
        let rooms = RoomManager::new(Arc::new(StubDirectory {
            memberships: vec![(conversation_id, member)],
        }));
        let connection_id = ConnectionId::new();

        assert!(rooms.join(conversation_id, connection_id, member).await.unwrap());
        assert!(!rooms.join(conversation_id, connection_id, member).await.unwrap());
        assert_eq!(rooms.members(conversation_id).await.len(), 1);
    }

    #[tokio::test]
    async fn evict_clears_every_room_for_the_connection() {
        let member = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let rooms = RoomManager::new(Arc::new(StubDirectory {
            memberships: vec![(first, member), (second, member)],
        }));
        let connection_id = ConnectionId::new();

        let joined = rooms.join_all_active(member, connection_id).await.unwrap();
        assert_eq!(joined.len(), 2);

        let mut left = rooms.evict(connection_id).await;
        left.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(left, expected);
        assert!(rooms.members(first).await.is_empty());
        assert!(rooms.members(second).await.is_empty());
    }

    #[tokio::test]
    async fn leave_only_affects_the_given_room() {
        let member = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let rooms = RoomManager::new(Arc::new(StubDirectory {
            memberships: vec![(conversation_id, member)],
        }));
        let connection_id = ConnectionId::new();

        rooms.join(conversation_id, connection_id, member).await.unwrap();
        assert!(rooms.leave(conversation_id, connection_id).await);
        assert!(!rooms.leave(conversation_id, connection_id).await);
        assert!(rooms.members(conversation_id).await.is_empty());
    }
}
