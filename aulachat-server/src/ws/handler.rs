//! WebSocket connection lifecycle and event dispatch.
//!
//! Authentication happens before the upgrade, so a rejected handshake
//! is a plain 401 with no registry, room, presence, or typing side
//! effects. Once upgraded, a connection is one read loop plus one write
//! task draining the outbox; every inbound event is handled in
//! isolation, and a failing handler surfaces an `error` event to the
//! client instead of tearing the connection down.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
    routing::get,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use shared::models::{UserProfile, UserStatus};
use shared::protocol::{
    ClientEvent, ErrorPayload, RoomMembershipBroadcast, ServerEvent, TypingBroadcast,
};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::http::error::ApiError;
use crate::services::{MessagingError, conversation_read_broadcast};

use super::hub::MessagingHub;
use super::registry::{ConnectionId, Outbox};
use super::rooms::ConversationDirectory;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Handshake endpoint. The token comes from the `token` query parameter
/// or a standard `Authorization: Bearer` header.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query.token.or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
    });

    let user = state.gatekeeper.authenticate(token.as_deref()).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

/// Runs one connection from admit to cleanup.
#[instrument(name = "ws.connection", skip(socket, state, user), fields(user_id = %user.id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: UserProfile) {
    let (outbox, mut events) = mpsc::unbounded_channel::<ServerEvent>();
    let (connection_id, first_for_user) = state.registry.admit(user.clone(), outbox.clone()).await;
    counter!("aulachat_connections_total").increment(1);
    info!(connection_id = %connection_id, first_for_user, "connection admitted");

    on_connect(&state, &user, connection_id, first_for_user).await;

    let (mut sink, mut stream) = socket.split();

    let mut write_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, event = event.name(), "failed to serialize event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut write_task => break,
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        dispatch_frame(&state, connection_id, &user, &outbox, text.as_str()).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "socket read error");
                        break;
                    }
                }
            }
        }
    }

    write_task.abort();
    on_disconnect(&state, &user, connection_id).await;
}

/// Connect-time side effects: persist presence, auto-join every active
/// conversation room, and announce the online transition to peers.
/// All best-effort; a failure is logged, not fatal.
async fn on_connect(
    state: &Arc<AppState>,
    user: &UserProfile,
    connection_id: ConnectionId,
    first_for_user: bool,
) {
    if let Err(err) = state
        .presence
        .mark_online(user.id, &connection_id.to_string())
        .await
    {
        warn!(error = %err, "failed to persist online status");
    }

    if let Err(err) = state.rooms.join_all_active(user.id, connection_id).await {
        warn!(error = %err, "failed to auto-join conversation rooms");
    }

    if first_for_user {
        let status = ServerEvent::UserStatusChange(UserStatus {
            user_id: user.id,
            is_online: true,
            timestamp: Utc::now(),
        });
        notify_peers(
            &state.hub,
            state.rooms.directory().as_ref(),
            user.id,
            &status,
        )
        .await;
    }
}

/// Disconnect-time side effects, run unconditionally after the loops
/// end: clear typing rows, leave rooms, and if this was the user's
/// final connection, persist and announce the offline transition.
async fn on_disconnect(state: &Arc<AppState>, user: &UserProfile, connection_id: ConnectionId) {
    match state.typing.clear_user(user.id).await {
        Ok(conversation_ids) => {
            for conversation_id in conversation_ids {
                let event = ServerEvent::UserTyping(TypingBroadcast {
                    conversation_id,
                    user_id: user.id,
                    nickname: user.nickname.clone(),
                    is_typing: false,
                });
                state
                    .hub
                    .broadcast_to_room(conversation_id, &event, Some(connection_id))
                    .await;
            }
        }
        Err(err) => warn!(error = %err, "failed to clear typing rows on disconnect"),
    }

    state.rooms.evict(connection_id).await;

    let Some(evicted) = state.registry.evict(connection_id).await else {
        return;
    };

    info!(connection_id = %connection_id, last_for_user = evicted.last_for_user, "connection closed");

    if evicted.last_for_user {
        if let Err(err) = state.presence.mark_offline(user.id).await {
            warn!(error = %err, "failed to persist offline status");
        }
        let status = ServerEvent::UserStatusChange(UserStatus {
            user_id: user.id,
            is_online: false,
            timestamp: Utc::now(),
        });
        notify_peers(
            &state.hub,
            state.rooms.directory().as_ref(),
            user.id,
            &status,
        )
        .await;
    }
}

/// Pushes a status event to each distinct peer across the user's active
/// conversations, resolved at notification time so conversations born
/// during the session are included. Presence goes straight to the
/// peer's connections, not through rooms, so it reaches peers who never
/// joined a room.
async fn notify_peers(
    hub: &MessagingHub,
    directory: &dyn ConversationDirectory,
    user_id: Uuid,
    event: &ServerEvent,
) {
    let peers = match directory.active_conversations(user_id).await {
        Ok(peers) => peers,
        Err(err) => {
            warn!(error = %err, "failed to resolve status recipients");
            return;
        }
    };

    let distinct: HashSet<Uuid> = peers.iter().map(|peer| peer.peer_id).collect();
    for peer_id in distinct {
        hub.send_to_user(peer_id, event).await;
    }
}

/// Parses and handles one inbound frame. Malformed frames and handler
/// failures answer with an `error` event on this connection only.
async fn dispatch_frame(
    state: &Arc<AppState>,
    connection_id: ConnectionId,
    user: &UserProfile,
    outbox: &Outbox,
    frame: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(frame) {
        Ok(event) => event,
        Err(err) => {
            debug!(error = %err, "ignoring malformed frame");
            send_error(outbox, "malformed event");
            return;
        }
    };

    if let Err(err) = handle_event(state, connection_id, user, outbox, event).await {
        warn!(error = %err, "event handler failed");
        send_error(outbox, &err.to_string());
    }
}

async fn handle_event(
    state: &Arc<AppState>,
    connection_id: ConnectionId,
    user: &UserProfile,
    outbox: &Outbox,
    event: ClientEvent,
) -> Result<(), MessagingError> {
    match event {
        ClientEvent::JoinConversation(conversation_id) => {
            let newly_joined = state
                .rooms
                .join(conversation_id, connection_id, user.id)
                .await?;
            if newly_joined {
                let event = ServerEvent::UserJoinedConversation(RoomMembershipBroadcast {
                    conversation_id,
                    user_id: user.id,
                    nickname: user.nickname.clone(),
                });
                state
                    .hub
                    .broadcast_to_room(conversation_id, &event, Some(connection_id))
                    .await;
            }
        }
        ClientEvent::LeaveConversation(conversation_id) => {
            if state.rooms.leave(conversation_id, connection_id).await {
                let event = ServerEvent::UserLeftConversation(RoomMembershipBroadcast {
                    conversation_id,
                    user_id: user.id,
                    nickname: user.nickname.clone(),
                });
                state
                    .hub
                    .broadcast_to_room(conversation_id, &event, Some(connection_id))
                    .await;
            }
        }
        ClientEvent::TypingStart(payload) => {
            state.typing.start(payload.conversation_id, user.id).await?;
            broadcast_typing(state, connection_id, user, payload.conversation_id, true).await;
        }
        ClientEvent::TypingStop(payload) => {
            state.typing.stop(payload.conversation_id, user.id).await?;
            broadcast_typing(state, connection_id, user, payload.conversation_id, false).await;
        }
        ClientEvent::MarkRead(payload) => {
            let outcome = state.messages.mark_read(payload.message_id, user.id).await?;
            if let Some((conversation_id, event)) = outcome.broadcast(payload.message_id, user.id) {
                state
                    .hub
                    .broadcast_to_room(conversation_id, &event, Some(connection_id))
                    .await;
            }
        }
        ClientEvent::MarkConversationRead(payload) => {
            let (count, read_at) = state
                .messages
                .mark_conversation_read(payload.conversation_id, user.id)
                .await?;
            if let Some(event) =
                conversation_read_broadcast(payload.conversation_id, user.id, count, read_at)
            {
                state
                    .hub
                    .broadcast_to_room(payload.conversation_id, &event, Some(connection_id))
                    .await;
            }
        }
        ClientEvent::RequestUserStatus(target_id) => {
            // The live registry wins over the persisted snapshot.
            let status = if state.registry.is_online(target_id).await {
                UserStatus {
                    user_id: target_id,
                    is_online: true,
                    timestamp: Utc::now(),
                }
            } else {
                state.presence.status_of(target_id).await?
            };
            let _ = outbox.send(ServerEvent::UserStatusResponse(status));
        }
    }

    Ok(())
}

async fn broadcast_typing(
    state: &Arc<AppState>,
    connection_id: ConnectionId,
    user: &UserProfile,
    conversation_id: Uuid,
    is_typing: bool,
) {
    let event = ServerEvent::UserTyping(TypingBroadcast {
        conversation_id,
        user_id: user.id,
        nickname: user.nickname.clone(),
        is_typing,
    });
    state
        .hub
        .broadcast_to_room(conversation_id, &event, Some(connection_id))
        .await;
}

fn send_error(outbox: &Outbox, message: &str) {
    let _ = outbox.send(ServerEvent::Error(ErrorPayload {
        message: message.to_string(),
    }));
}
