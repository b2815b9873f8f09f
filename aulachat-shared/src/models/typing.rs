use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One "user X is typing in conversation Y" record.
///
/// Rows are soft state: a row whose expiry has passed counts as
/// not-typing even before the sweep physically removes it. Both the
/// read path and the sweep go through [`TypingStatus::is_expired`] so
/// the time comparison lives in exactly one place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TypingStatus {
    /// Whether this row is stale at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
