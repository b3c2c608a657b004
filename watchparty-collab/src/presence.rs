use std::sync::Arc;

use log::{info, warn};

use crate::{db::Database, sessions::Session, CollabContext, UserId};

/// A user with at least one live chat session. The registry entry
/// exists exactly as long as the session set is non-empty.
#[derive(Debug)]
pub struct OnlineUser {
    pub username: String,
    pub sessions: Vec<Arc<Session>>,
}

/// Tracks which user identities currently have a live chat session and
/// mirrors the online/offline transitions into the store.
pub struct PresenceRegistry<Db> {
    context: CollabContext<Db>,
}

impl<Db: Database> PresenceRegistry<Db> {
    pub fn new(context: &CollabContext<Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Adds a session to the user's set. The 0 → 1 transition records
    /// the user as online in the store.
    pub fn attach(&self, session: Arc<Session>) {
        let user_id = session.user_id;
        let mut came_online = false;

        self.context
            .online
            .entry(user_id)
            .and_modify(|user| user.sessions.push(session.clone()))
            .or_insert_with(|| {
                came_online = true;
                OnlineUser {
                    username: session.username.clone(),
                    sessions: vec![session.clone()],
                }
            });

        if came_online {
            info!("User {} is online", session.username);
            self.persist_presence(user_id, true);
        }
    }

    /// Removes a session from the user's set. The 1 → 0 transition
    /// drops the entry and records the user as offline.
    pub fn detach(&self, session: &Session) {
        let user_id = session.user_id;

        let went_offline = {
            match self.context.online.get_mut(&user_id) {
                Some(mut user) => {
                    user.sessions.retain(|s| s.id != session.id);
                    user.sessions.is_empty()
                }
                None => false,
            }
        };

        if went_offline {
            self.context.online.remove(&user_id);
            info!("User {} is offline", session.username);
            self.persist_presence(user_id, false);
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.context.online.contains_key(&user_id)
    }

    pub fn sessions_of(&self, user_id: UserId) -> Vec<Arc<Session>> {
        self.context
            .online
            .get(&user_id)
            .map(|user| user.sessions.clone())
            .unwrap_or_default()
    }

    pub fn online_count(&self) -> usize {
        self.context.online.len()
    }

    /// One reaper pass: drop sessions whose transport is gone, then
    /// detach users left with none.
    pub fn sweep(&self) {
        let mut offline = Vec::new();

        for mut entry in self.context.online.iter_mut() {
            entry.sessions.retain(|s| s.is_open());
            if entry.sessions.is_empty() {
                offline.push(*entry.key());
            }
        }

        for user_id in offline {
            self.context.online.remove(&user_id);
            self.persist_presence(user_id, false);
        }
    }

    /// Best-effort store write; the registry is authoritative in memory
    /// and brief flapping during reconnects is acceptable.
    fn persist_presence(&self, user_id: UserId, online: bool) {
        let db = self.context.database.clone();

        tokio::spawn(async move {
            if let Err(error) = db.set_presence(user_id, online).await {
                warn!("Failed to persist presence of user {user_id}: {error}");
            }
        });
    }
}
