use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The display profile attached to an authenticated connection.
///
/// This is the result of resolving a bearer credential: the user's
/// identity plus the fields peers see in conversation lists and
/// typing indicators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Unique identifier for the user.
    pub id: Uuid,

    /// The name shown to conversation peers.
    pub nickname: String,

    /// Optional avatar image reference.
    pub avatar_url: Option<String>,
}
