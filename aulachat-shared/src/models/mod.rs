pub mod conversation;
pub mod message;
pub mod presence;
pub mod typing;
pub mod user;

pub use conversation::{
    Conversation, ConversationContext, ConversationSettings, ConversationSummary,
    CreateConversationRequest,
};
pub use message::{Message, MessageAttachment, MessagePage, UnreadCount};
pub use presence::{OnlineStatusRecord, UserStatus};
pub use typing::TypingStatus;
pub use user::UserProfile;
