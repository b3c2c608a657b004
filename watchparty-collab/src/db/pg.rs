use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::{Database, DatabaseError, FriendRequestData, PrivateMessageData, Result, UserId};

/// A postgres store implementation. The pool is capped at ten
/// connections; an acquire that has to wait suspends the issuing task,
/// never a room lock.
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(internal)?;

        Ok(Self { pool })
    }
}

fn internal(error: sqlx::Error) -> DatabaseError {
    DatabaseError::Internal(Box::new(error))
}

#[async_trait]
impl Database for PgDatabase {
    async fn set_presence(&self, user_id: UserId, online: bool) -> Result<()> {
        sqlx::query("UPDATE users SET is_online = $1, last_seen = NOW() WHERE id = $2")
            .bind(online)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(internal)
            .map(|_| ())
    }

    async fn insert_private_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> Result<PrivateMessageData> {
        sqlx::query_as::<_, PrivateMessageData>(
            "WITH inserted AS (
                INSERT INTO chat_messages (sender_id, receiver_id, message)
                VALUES ($1, $2, $3)
                RETURNING id, sender_id, receiver_id, message, created_at
            )
            SELECT inserted.*, users.username AS sender_username
            FROM inserted
                INNER JOIN users ON users.id = inserted.sender_id",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)
    }

    async fn unread_messages_for(
        &self,
        receiver_id: UserId,
        limit: i64,
    ) -> Result<Vec<PrivateMessageData>> {
        sqlx::query_as::<_, PrivateMessageData>(
            "SELECT m.id, m.sender_id, m.receiver_id, m.message, m.created_at,
                    u.username AS sender_username
             FROM chat_messages m
                 INNER JOIN users u ON u.id = m.sender_id
             WHERE m.receiver_id = $1 AND m.is_read = false
             ORDER BY m.created_at DESC
             LIMIT $2",
        )
        .bind(receiver_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn pending_friend_requests_for(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<FriendRequestData>> {
        sqlx::query_as::<_, FriendRequestData>(
            "SELECT f.id, f.user_id, f.friend_id, f.status, f.created_at,
                    u.username AS requester_username
             FROM friends f
                 INNER JOIN users u ON u.id = f.user_id
             WHERE f.friend_id = $1 AND f.status = 'pending'
             ORDER BY f.created_at DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn update_party_playback(
        &self,
        room_code: &str,
        position: f64,
        playing: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE watch_parties
             SET video_current_time = $1, is_playing = $2, updated_at = NOW()
             WHERE room_code = $3",
        )
        .bind(position)
        .bind(playing)
        .bind(room_code)
        .execute(&self.pool)
        .await
        .map_err(internal)
        .map(|_| ())
    }

    async fn insert_party_message(
        &self,
        room_code: &str,
        user_id: UserId,
        body: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO watch_party_messages (room_code, user_id, message) VALUES ($1, $2, $3)")
            .bind(room_code)
            .bind(user_id)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(internal)
            .map(|_| ())
    }

    async fn touch_party_participant(&self, room_code: &str, user_id: UserId) -> Result<()> {
        sqlx::query(
            "UPDATE watch_party_participants SET last_seen = NOW()
             WHERE room_code = $1 AND user_id = $2",
        )
        .bind(room_code)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(internal)
        .map(|_| ())
    }
}
