use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point-in-time answer to "is this user online right now".
///
/// Snapshots come from the in-memory session registry, which is
/// authoritative for the present; the durable record below is
/// authoritative for "last seen when offline".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: Uuid,
    pub is_online: bool,
    pub timestamp: DateTime<Utc>,
}

/// The durable mirror of a user's presence, one row per user.
///
/// Mutated only by the session registry's admit/evict transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatusRecord {
    pub user_id: Uuid,
    pub is_online: bool,
    /// The transport handle of the most recent connection, cleared on
    /// the offline transition.
    pub connection_id: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}
