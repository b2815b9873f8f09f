//! Database-backed service layer for the messaging domain.
//!
//! Services own the SQL; they never touch the realtime fan-out. Handlers
//! and the socket loop compose a service call (authoritative state
//! transition) with a best-effort broadcast afterwards.

pub mod conversation_service;
pub mod message_service;
pub mod presence_service;
pub mod typing_service;

pub use conversation_service::ConversationService;
pub use message_service::{MarkReadOutcome, MessageService, conversation_read_broadcast};
pub use presence_service::PresenceService;
pub use typing_service::TypingService;

use thiserror::Error;

/// Errors surfaced by the messaging services.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    Validation(String),
}

impl MessagingError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
