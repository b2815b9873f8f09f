//! Serves stored message attachments by their storage name.

use std::sync::Arc;

use axum::{
    Extension, Router,
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::app_state::AppState;
use crate::http::error::ApiError;
use crate::middleware::auth::AuthenticatedUser;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/attachments/{file_name}", get(fetch))
}

async fn fetch(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(_user)): Extension<AuthenticatedUser>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    // Storage names are server-generated UUIDs plus an extension;
    // anything else is a traversal attempt.
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
        return Err(ApiError::not_found("attachment not found"));
    }

    let path = state.config.messaging.uploads_dir.join(&file_name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("attachment not found"));
        }
        Err(err) => return Err(err.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Body::from(bytes),
    )
        .into_response())
}
