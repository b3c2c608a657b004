use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use super::{Database, DatabaseError, FriendRequestData, PrivateMessageData, Result, UserId};

/// An in-memory store double. Backs the engine tests and store-less
/// development runs; every operation is a plain mutex critical section.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    failing: bool,
    usernames: HashMap<UserId, String>,
    presence: HashMap<UserId, bool>,
    messages: Vec<StoredMessage>,
    requests: Vec<FriendRequestData>,
    playback_writes: Vec<(String, f64, bool)>,
    party_messages: Vec<(String, UserId, String)>,
}

struct StoredMessage {
    data: PrivateMessageData,
    read: bool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail, for degradation tests.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    pub fn put_username(&self, user_id: UserId, username: &str) {
        self.inner.lock().usernames.insert(user_id, username.to_string());
    }

    /// Seeds an unread message as if it had been persisted while the
    /// receiver was offline. Later seeds are newer.
    pub fn seed_unread_message(&self, sender_id: UserId, receiver_id: UserId, body: &str) -> i64 {
        let mut inner = self.inner.lock();
        let id = inner.take_id();
        let sender_username = inner.username_of(sender_id);

        // Spread creation times so newest-first ordering is observable.
        let created_at = Utc::now() + Duration::milliseconds(id);

        inner.messages.push(StoredMessage {
            data: PrivateMessageData {
                id,
                sender_id,
                receiver_id,
                message: body.to_string(),
                sender_username,
                created_at,
            },
            read: false,
        });

        id
    }

    pub fn seed_pending_request(&self, user_id: UserId, friend_id: UserId) -> i64 {
        let mut inner = self.inner.lock();
        let id = inner.take_id();
        let requester_username = inner.username_of(user_id);
        let created_at = Utc::now() + Duration::milliseconds(id);

        inner.requests.push(FriendRequestData {
            id,
            user_id,
            friend_id,
            status: "pending".to_string(),
            requester_username,
            created_at,
        });

        id
    }

    pub fn presence_of(&self, user_id: UserId) -> Option<bool> {
        self.inner.lock().presence.get(&user_id).copied()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn playback_write_count(&self) -> usize {
        self.inner.lock().playback_writes.len()
    }

    pub fn party_message_count(&self) -> usize {
        self.inner.lock().party_messages.len()
    }
}

impl Inner {
    fn take_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn username_of(&self, user_id: UserId) -> String {
        self.usernames
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| format!("user{user_id}"))
    }

    fn check(&self) -> Result<()> {
        if self.failing {
            Err(DatabaseError::Internal("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn set_presence(&self, user_id: UserId, online: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check()?;
        inner.presence.insert(user_id, online);
        Ok(())
    }

    async fn insert_private_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        body: &str,
    ) -> Result<PrivateMessageData> {
        let mut inner = self.inner.lock();
        inner.check()?;

        let id = inner.take_id();
        let data = PrivateMessageData {
            id,
            sender_id,
            receiver_id,
            message: body.to_string(),
            sender_username: inner.username_of(sender_id),
            created_at: Utc::now() + Duration::milliseconds(id),
        };

        inner.messages.push(StoredMessage {
            data: data.clone(),
            read: false,
        });

        Ok(data)
    }

    async fn unread_messages_for(
        &self,
        receiver_id: UserId,
        limit: i64,
    ) -> Result<Vec<PrivateMessageData>> {
        let inner = self.inner.lock();
        inner.check()?;

        let mut unread: Vec<_> = inner
            .messages
            .iter()
            .filter(|m| !m.read && m.data.receiver_id == receiver_id)
            .map(|m| m.data.clone())
            .collect();

        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        unread.truncate(limit as usize);

        Ok(unread)
    }

    async fn pending_friend_requests_for(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<FriendRequestData>> {
        let inner = self.inner.lock();
        inner.check()?;

        let mut pending: Vec<_> = inner
            .requests
            .iter()
            .filter(|r| r.friend_id == user_id && r.status == "pending")
            .cloned()
            .collect();

        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pending.truncate(limit as usize);

        Ok(pending)
    }

    async fn update_party_playback(
        &self,
        room_code: &str,
        position: f64,
        playing: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check()?;
        inner
            .playback_writes
            .push((room_code.to_string(), position, playing));
        Ok(())
    }

    async fn insert_party_message(
        &self,
        room_code: &str,
        user_id: UserId,
        body: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check()?;
        inner
            .party_messages
            .push((room_code.to_string(), user_id, body.to_string()));
        Ok(())
    }

    async fn touch_party_participant(&self, _room_code: &str, _user_id: UserId) -> Result<()> {
        self.inner.lock().check()
    }
}
