use async_trait::async_trait;
use thiserror::Error;

mod data;
mod memory;
mod pg;

pub use data::*;
pub use memory::MemoryDatabase;
pub use pg::PgDatabase;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the store.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A row the engine expected doesn't exist.
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
}

/// The narrow interface the engine consumes from the relational store.
/// Every call is a suspension point; callers must not hold a room lock
/// across one.
#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// Records an online/offline transition, touching `last_seen`.
    async fn set_presence(&self, user_id: UserId, online: bool) -> Result<()>;

    /// Persists a direct message and returns the stored row with its
    /// server-assigned id.
    async fn insert_private_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> Result<PrivateMessageData>;

    /// Unread messages addressed to `receiver_id`, newest first.
    async fn unread_messages_for(
        &self,
        receiver_id: UserId,
        limit: i64,
    ) -> Result<Vec<PrivateMessageData>>;

    /// Pending friendship requests addressed to `user_id`, newest first.
    async fn pending_friend_requests_for(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<FriendRequestData>>;

    async fn update_party_playback(&self, room_code: &str, position: f64, playing: bool)
        -> Result<()>;

    async fn insert_party_message(&self, room_code: &str, user_id: UserId, body: &str)
        -> Result<()>;

    async fn touch_party_participant(&self, room_code: &str, user_id: UserId) -> Result<()>;
}
