//! Best-effort event fan-out.
//!
//! The hub is the single place that turns "this happened" into pushes on
//! connection outboxes. Delivery is never load-bearing: a full or closed
//! queue drops the event for that connection, logs it, and moves on. The
//! authoritative state transition always happened before the hub is
//! called.

use std::sync::Arc;

use metrics::counter;
use shared::protocol::ServerEvent;
use tracing::debug;
use uuid::Uuid;

use super::registry::{ConnectionId, SessionRegistry};
use super::rooms::RoomManager;

#[derive(Debug)]
pub struct MessagingHub {
    registry: Arc<SessionRegistry>,
    rooms: Arc<RoomManager>,
}

impl MessagingHub {
    pub fn new(registry: Arc<SessionRegistry>, rooms: Arc<RoomManager>) -> Self {
        Self { registry, rooms }
    }

    /// Pushes an event to every connection in a room, optionally
    /// excluding one (usually the connection that triggered it).
    /// Returns how many connections accepted the event.
    pub async fn broadcast_to_room(
        &self,
        conversation_id: Uuid,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        for member in self.rooms.members(conversation_id).await {
            if Some(member) == exclude {
                continue;
            }
            if self.send_to_connection(member, event.clone()).await {
                delivered += 1;
            }
        }
        counter!("aulachat_events_broadcast_total", "event" => event.name())
            .increment(delivered as u64);
        delivered
    }

    /// Pushes an event to every live connection of one user.
    pub async fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for outbox in self.registry.outboxes_of(user_id).await {
            if outbox.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                self.note_drop(event);
            }
        }
        delivered
    }

    /// Pushes an event to a single connection. Returns whether the
    /// connection's queue accepted it.
    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        match self.registry.outbox(connection_id).await {
            Some(outbox) => {
                let name = event.name();
                if outbox.send(event).is_ok() {
                    true
                } else {
                    debug!(connection_id = %connection_id, event = name, "dropped event for closed connection");
                    counter!("aulachat_events_dropped_total", "event" => name).increment(1);
                    false
                }
            }
            None => false,
        }
    }

    fn note_drop(&self, event: &ServerEvent) {
        debug!(event = event.name(), "dropped event for closed connection");
        counter!("aulachat_events_dropped_total", "event" => event.name()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MessagingError;
    use crate::ws::rooms::{ConversationDirectory, ConversationPeer};
    use async_trait::async_trait;
    use shared::models::UserProfile;
    use shared::protocol::ErrorPayload;
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct OpenDirectory;

    #[async_trait]
    impl ConversationDirectory for OpenDirectory {
        async fn is_participant(&self, _: Uuid, _: Uuid) -> Result<bool, MessagingError> {
            Ok(true)
        }

        async fn active_conversations(
            &self,
            _: Uuid,
        ) -> Result<Vec<ConversationPeer>, MessagingError> {
            Ok(Vec::new())
        }
    }

    fn profile(nickname: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            nickname: nickname.to_string(),
            avatar_url: None,
        }
    }

    fn error_event(message: &str) -> ServerEvent {
        ServerEvent::Error(ErrorPayload {
            message: message.to_string(),
        })
    }

    #[tokio::test]
    async fn room_broadcast_skips_the_excluded_connection() {
        let registry = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomManager::new(Arc::new(OpenDirectory)));
        let hub = MessagingHub::new(registry.clone(), rooms.clone());

        let conversation_id = Uuid::new_v4();
        let sender = profile("ana");
        let receiver = profile("bruno");

        let (sender_tx, mut sender_rx) = mpsc::unbounded_channel();
        let (receiver_tx, mut receiver_rx) = mpsc::unbounded_channel();
        let (sender_conn, _) = registry.admit(sender.clone(), sender_tx).await;
        let (receiver_conn, _) = registry.admit(receiver.clone(), receiver_tx).await;
        rooms.join(conversation_id, sender_conn, sender.id).await.unwrap();
        rooms.join(conversation_id, receiver_conn, receiver.id).await.unwrap();

        let event = error_event("hello");
        let delivered = hub
            .broadcast_to_room(conversation_id, &event, Some(sender_conn))
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(receiver_rx.recv().await.unwrap(), event);
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_outbox_does_not_fail_the_broadcast() {
        let registry = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomManager::new(Arc::new(OpenDirectory)));
        let hub = MessagingHub::new(registry.clone(), rooms.clone());

        let conversation_id = Uuid::new_v4();
        let gone = profile("gone");
        let live = profile("live");

        let (gone_tx, gone_rx) = mpsc::unbounded_channel();
        drop(gone_rx);
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let (gone_conn, _) = registry.admit(gone.clone(), gone_tx).await;
        let (live_conn, _) = registry.admit(live.clone(), live_tx).await;
        rooms.join(conversation_id, gone_conn, gone.id).await.unwrap();
        rooms.join(conversation_id, live_conn, live.id).await.unwrap();

        let event = error_event("still works");
        let delivered = hub.broadcast_to_room(conversation_id, &event, None).await;

        assert_eq!(delivered, 1, "the closed connection is skipped, not fatal");
        assert_eq!(live_rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_to_user_reaches_all_tabs() {
        let registry = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomManager::new(Arc::new(OpenDirectory)));
        let hub = MessagingHub::new(registry.clone(), rooms);

        let user = profile("carla");
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.admit(user.clone(), tx1).await;
        registry.admit(user.clone(), tx2).await;

        let event = error_event("both tabs");
        assert_eq!(hub.send_to_user(user.id, &event).await, 2);
        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
        assert_eq!(hub.send_to_user(Uuid::new_v4(), &event).await, 0);
    }
}
