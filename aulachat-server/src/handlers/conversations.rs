//! Conversation endpoints: listing, create-or-get, detail, archive,
//! and per-side settings.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
};
use serde::Deserialize;
use shared::models::{
    Conversation, ConversationSettings, ConversationSummary, CreateConversationRequest,
    TypingStatus,
};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::http::error::{ApiError, AppResult};
use crate::middleware::auth::AuthenticatedUser;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/conversations", get(list).post(create_or_get))
        .route("/conversations/{id}", get(detail))
        .route("/conversations/{id}/typing", get(typing))
        .route("/conversations/{id}/archive", post(set_archived))
        .route("/conversations/{id}/settings", patch(update_settings))
}

async fn list(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    let summaries = state.conversations.list(user.id).await?;
    Ok(Json(summaries))
}

async fn create_or_get(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Json(request): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    let conversation = state.conversations.get_or_create(user.id, request).await?;
    Ok((StatusCode::OK, Json(conversation)))
}

async fn detail(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    let conversation = state.conversations.get(conversation_id, user.id).await?;
    Ok(Json(conversation))
}

/// Who is typing right now. Expired indicators are already filtered
/// out by the service, so a stale row never shows up here.
async fn typing(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Vec<TypingStatus>>> {
    state.conversations.get(conversation_id, user.id).await?;
    let typists = state.typing.active_in(conversation_id).await?;
    Ok(Json(typists))
}

#[derive(Debug, Deserialize)]
struct ArchiveRequest {
    archived: bool,
}

async fn set_archived(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<ArchiveRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .conversations
        .set_archived(conversation_id, user.id, request.archived)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
    Json(settings): Json<ConversationSettings>,
) -> Result<StatusCode, ApiError> {
    state
        .conversations
        .update_settings(conversation_id, user.id, settings)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
