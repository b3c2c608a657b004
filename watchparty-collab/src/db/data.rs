use chrono::{DateTime, Utc};

/// The type used for user identifiers across the engine and the store.
pub type UserId = i64;

/// A persisted direct message, joined with the sender's username.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PrivateMessageData {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub sender_username: String,
    pub created_at: DateTime<Utc>,
}

/// A pending friendship request, joined with the requester's username.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FriendRequestData {
    pub id: i64,
    /// The user who sent the request.
    pub user_id: UserId,
    /// The user the request is addressed to.
    pub friend_id: UserId,
    pub status: String,
    pub requester_username: String,
    pub created_at: DateTime<Utc>,
}
