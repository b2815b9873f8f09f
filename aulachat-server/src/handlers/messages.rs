//! Message endpoints: history, multipart send, read receipts, unread
//! count, and search.
//!
//! The send and read endpoints echo their outcome onto the realtime
//! channel after committing. Clients receiving both the HTTP response
//! and the room broadcast de-duplicate by message id.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use shared::models::{Message, MessageAttachment, MessagePage, UnreadCount};
use shared::protocol::ServerEvent;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::http::error::{ApiError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::services::{MarkReadOutcome, conversation_read_broadcast};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/conversations/{id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/{id}/read", post(mark_conversation_read))
        .route("/messages/{id}/read", post(mark_read))
        .route("/unread-count", get(unread_count))
        .route("/search", get(search))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageQuery {
    before_id: Option<Uuid>,
    limit: Option<i64>,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<MessagePage>> {
    let default_limit = state.config.messaging.message_page_size;
    let limit = query.limit.unwrap_or(default_limit).clamp(1, default_limit);
    let page = state
        .messages
        .page(conversation_id, user.id, query.before_id, limit)
        .await?;
    Ok(Json(page))
}

/// Accepts `multipart/form-data` with a `body` text field and any
/// number of `files` parts. The persisted message is returned to the
/// sender and pushed to the room as `new_message`.
async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Message>)> {
    let mut body = String::new();
    let mut attachments = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?
    {
        match field.name() {
            Some("body") => {
                body = field
                    .text()
                    .await
                    .map_err(|err| ApiError::bad_request(err.to_string()))?;
            }
            Some("files") => {
                let original_name = field.file_name().unwrap_or("attachment").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::bad_request(err.to_string()))?;

                let file_name =
                    store_attachment(&state, &original_name, &bytes).await?;
                attachments.push(MessageAttachment {
                    file_name,
                    original_name,
                    mime_type,
                    size_bytes: bytes.len() as i64,
                });
            }
            _ => {}
        }
    }

    let message = state
        .messages
        .send(user.id, conversation_id, body, attachments)
        .await?;

    // Realtime echo; duplicates are resolved client-side by message id.
    state
        .hub
        .broadcast_to_room(conversation_id, &ServerEvent::NewMessage(message.clone()), None)
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Writes the uploaded bytes under a collision-free storage name and
/// returns that name.
async fn store_attachment(
    state: &Arc<AppState>,
    original_name: &str,
    bytes: &[u8],
) -> Result<String, ApiError> {
    let extension = std::path::Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(char::is_alphanumeric))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let file_name = format!("{}{extension}", Uuid::new_v4());

    let dir = &state.config.messaging.uploads_dir;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(&file_name), bytes).await?;

    Ok(file_name)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    already_read: bool,
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<MarkReadResponse>> {
    let outcome = state.messages.mark_read(message_id, user.id).await?;

    let already_read = matches!(outcome, MarkReadOutcome::AlreadyRead);
    if let Some((conversation_id, event)) = outcome.broadcast(message_id, user.id) {
        state.hub.broadcast_to_room(conversation_id, &event, None).await;
    }

    Ok(Json(MarkReadResponse { already_read }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationReadResponse {
    marked_count: u64,
}

async fn mark_conversation_read(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ConversationReadResponse>> {
    let (marked_count, read_at) = state
        .messages
        .mark_conversation_read(conversation_id, user.id)
        .await?;

    if let Some(event) = conversation_read_broadcast(conversation_id, user.id, marked_count, read_at)
    {
        state.hub.broadcast_to_room(conversation_id, &event, None).await;
    }

    Ok(Json(ConversationReadResponse { marked_count }))
}

async fn unread_count(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> AppResult<Json<UnreadCount>> {
    let count = state.messages.unread_count(user.id).await?;
    Ok(Json(count))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<i64>,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let messages = state.messages.search(user.id, &query.q, limit).await?;
    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_accepts_camel_case_cursor() {
        let query: PageQuery =
            serde_json::from_str(r#"{"beforeId":"8f7c2d1e-0000-0000-0000-000000000001","limit":10}"#)
                .unwrap();
        assert!(query.before_id.is_some());
        assert_eq!(query.limit, Some(10));
    }
}
