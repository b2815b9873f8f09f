//! In-memory index of live socket connections.
//!
//! The registry maps both directions at once: connection handle to user,
//! and user to the set of connection handles. Both maps live behind one
//! lock so admit and evict stay atomic, which is what makes the
//! first-connection / last-connection signals trustworthy for presence.
//! Nothing here is persisted; a process restart starts from empty.

use std::collections::{HashMap, HashSet};
use std::fmt;

use metrics::gauge;
use shared::models::UserProfile;
use shared::protocol::ServerEvent;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

/// Opaque handle for one live socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sender half of a connection's outbound event queue.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

struct ConnectionEntry {
    user: UserProfile,
    outbox: Outbox,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    users: HashMap<Uuid, HashSet<ConnectionId>>,
}

/// What [`SessionRegistry::evict`] learned about the closed connection.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictOutcome {
    pub user: UserProfile,
    /// True when this was the user's final connection, so the user just
    /// went offline.
    pub last_for_user: bool,
}

/// The user <-> connections index. One per process, shared via `Arc`.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Registers a freshly authenticated connection.
    ///
    /// Returns the new connection handle and whether this is the user's
    /// first live connection (the online transition).
    pub async fn admit(&self, user: UserProfile, outbox: Outbox) -> (ConnectionId, bool) {
        let connection_id = ConnectionId::new();
        let mut inner = self.inner.lock().await;

        let user_id = user.id;
        inner
            .connections
            .insert(connection_id, ConnectionEntry { user, outbox });
        let connections = inner.users.entry(user_id).or_default();
        let first_for_user = connections.is_empty();
        connections.insert(connection_id);

        gauge!("aulachat_active_connections").set(inner.connections.len() as f64);
        gauge!("aulachat_online_users").set(inner.users.len() as f64);

        (connection_id, first_for_user)
    }

    /// Removes a connection from both maps.
    ///
    /// Returns `None` if the handle was never admitted (or already
    /// evicted), making eviction safe to call from every cleanup path.
    pub async fn evict(&self, connection_id: ConnectionId) -> Option<EvictOutcome> {
        let mut inner = self.inner.lock().await;

        let entry = inner.connections.remove(&connection_id)?;
        let user_id = entry.user.id;

        let last_for_user = match inner.users.get_mut(&user_id) {
            Some(connections) => {
                connections.remove(&connection_id);
                connections.is_empty()
            }
            None => true,
        };
        if last_for_user {
            inner.users.remove(&user_id);
        }

        gauge!("aulachat_active_connections").set(inner.connections.len() as f64);
        gauge!("aulachat_online_users").set(inner.users.len() as f64);

        Some(EvictOutcome {
            user: entry.user,
            last_for_user,
        })
    }

    /// The profile the connection authenticated as.
    pub async fn user_of(&self, connection_id: ConnectionId) -> Option<UserProfile> {
        let inner = self.inner.lock().await;
        inner
            .connections
            .get(&connection_id)
            .map(|entry| entry.user.clone())
    }

    /// Whether the user has at least one live connection.
    pub async fn is_online(&self, user_id: Uuid) -> bool {
        let inner = self.inner.lock().await;
        inner.users.contains_key(&user_id)
    }

    /// Every user with at least one live connection.
    pub async fn online_users(&self) -> Vec<Uuid> {
        let inner = self.inner.lock().await;
        inner.users.keys().copied().collect()
    }

    /// Outbound queue for one connection, if it is still live.
    pub async fn outbox(&self, connection_id: ConnectionId) -> Option<Outbox> {
        let inner = self.inner.lock().await;
        inner
            .connections
            .get(&connection_id)
            .map(|entry| entry.outbox.clone())
    }

    /// Outbound queues for every live connection of a user.
    pub async fn outboxes_of(&self, user_id: Uuid) -> Vec<Outbox> {
        let inner = self.inner.lock().await;
        let Some(connections) = inner.users.get(&user_id) else {
            return Vec::new();
        };
        connections
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .map(|entry| entry.outbox.clone())
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::ErrorPayload;

    fn profile(nickname: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            nickname: nickname.to_string(),
            avatar_url: None,
        }
    }

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn first_and_last_connection_transitions() {
        let registry = SessionRegistry::new();
        let user = profile("ana");

        let (tx1, _rx1) = outbox();
        let (tx2, _rx2) = outbox();
        let (first_id, first) = registry.admit(user.clone(), tx1).await;
        let (second_id, second) = registry.admit(user.clone(), tx2).await;

        assert!(first, "first connection marks the user online");
        assert!(!second, "second tab is not an online transition");
        assert!(registry.is_online(user.id).await);
        assert_eq!(registry.online_users().await, vec![user.id]);

        let evicted = registry.evict(first_id).await.unwrap();
        assert!(!evicted.last_for_user);
        assert!(registry.is_online(user.id).await);

        let evicted = registry.evict(second_id).await.unwrap();
        assert!(evicted.last_for_user, "final eviction takes the user offline");
        assert!(!registry.is_online(user.id).await);
    }

    #[tokio::test]
    async fn evict_is_idempotent() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = outbox();
        let (id, _) = registry.admit(profile("bruno"), tx).await;

        assert!(registry.evict(id).await.is_some());
        assert!(registry.evict(id).await.is_none());
        assert!(registry.evict(ConnectionId::new()).await.is_none());
    }

    #[tokio::test]
    async fn outboxes_of_reaches_every_tab() {
        let registry = SessionRegistry::new();
        let user = profile("carla");

        let (tx1, mut rx1) = outbox();
        let (tx2, mut rx2) = outbox();
        registry.admit(user.clone(), tx1).await;
        registry.admit(user.clone(), tx2).await;

        let event = ServerEvent::Error(ErrorPayload {
            message: "ping".into(),
        });
        for sender in registry.outboxes_of(user.id).await {
            sender.send(event.clone()).unwrap();
        }

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
        assert!(registry.outboxes_of(Uuid::new_v4()).await.is_empty());
    }
}
