use std::sync::Arc;

use shared::config::Config;
use sqlx::PgPool;

use crate::services::{
    ConversationService, MessageService, PresenceService, TypingService,
};
use crate::ws::gatekeeper::ConnectionGatekeeper;
use crate::ws::hub::MessagingHub;
use crate::ws::registry::SessionRegistry;
use crate::ws::rooms::RoomManager;

/// Application state shared across all routes and socket tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub gatekeeper: Arc<ConnectionGatekeeper>,
    pub registry: Arc<SessionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub hub: Arc<MessagingHub>,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub presence: PresenceService,
    pub typing: Arc<TypingService>,
}
