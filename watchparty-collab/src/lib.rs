mod db;
mod messaging;
mod presence;
mod protocol;
mod reaper;
mod rooms;
mod sessions;
mod util;

use std::sync::Arc;

use dashmap::DashMap;

pub use db::{
    Database, DatabaseError, FriendRequestData, MemoryDatabase, PgDatabase, PrivateMessageData,
    UserId,
};
pub use messaging::*;
pub use presence::*;
pub use protocol::*;
pub use reaper::*;
pub use rooms::*;
pub use sessions::*;
pub use util::{now_millis, Id};

/// The watchparty collab system: rooms, presence, and direct messaging
/// over one shared context.
pub struct Collab<Db> {
    pub rooms: RoomManager<Db>,
    pub presence: PresenceRegistry<Db>,
    pub messaging: Messaging<Db>,

    context: CollabContext<Db>,
}

/// State shared by every subsystem: the store handle and the global
/// registries. Registry lookups are short critical sections, distinct
/// from any per-room lock.
pub struct CollabContext<Db> {
    pub database: Arc<Db>,

    pub rooms: Arc<DashMap<String, Arc<Room<Db>>>>,
    pub connections: Arc<DashMap<SessionId, Arc<Session>>>,
    pub online: Arc<DashMap<UserId, OnlineUser>>,
}

impl<Db> CollabContext<Db> {
    /// Every live session of an online user, or none.
    pub fn sessions_of(&self, user_id: UserId) -> Vec<Arc<Session>> {
        self.online
            .get(&user_id)
            .map(|user| user.sessions.clone())
            .unwrap_or_default()
    }
}

impl<Db> Clone for CollabContext<Db> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            rooms: self.rooms.clone(),
            connections: self.connections.clone(),
            online: self.online.clone(),
        }
    }
}

impl<Db: Database> Collab<Db> {
    pub fn new(database: Db) -> Self {
        let context = CollabContext {
            database: Arc::new(database),
            rooms: Default::default(),
            connections: Default::default(),
            online: Default::default(),
        };

        Self {
            rooms: RoomManager::new(&context),
            presence: PresenceRegistry::new(&context),
            messaging: Messaging::new(&context),
            context,
        }
    }

    pub fn database(&self) -> &Db {
        &self.context.database
    }

    /// Registers a freshly accepted session in the global table.
    pub fn register(&self, session: Arc<Session>) {
        self.context.connections.insert(session.id, session);
    }

    pub fn unregister(&self, id: SessionId) {
        self.context.connections.remove(&id);
    }

    pub fn connection_count(&self) -> usize {
        self.context.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.count()
    }

    pub fn online_count(&self) -> usize {
        self.presence.online_count()
    }

    /// One reaper pass over every table. Returns how many dead sessions
    /// were dropped from the connections table.
    pub fn sweep(&self) -> usize {
        let before = self.context.connections.len();
        self.context.connections.retain(|_, session| session.is_open());
        let reaped = before.saturating_sub(self.context.connections.len());

        self.rooms.sweep();
        self.presence.sweep();

        reaped
    }

    /// Closes every live session with a normal status; used on process
    /// shutdown before the accept loop stops.
    pub fn shutdown(&self) {
        for entry in self.context.connections.iter() {
            entry
                .value()
                .close(CLOSE_NORMAL, "El servidor se está apagando");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sweep_reaps_closed_connections() {
        let collab = Collab::new(MemoryDatabase::new());

        let (tx, rx) = mpsc::unbounded_channel();
        let dead = Arc::new(Session::new(1, "Dead".into(), tx));
        let (tx, _keep) = mpsc::unbounded_channel();
        let live = Arc::new(Session::new(2, "Live".into(), tx));

        collab.register(dead);
        collab.register(live);
        drop(rx);

        assert_eq!(collab.sweep(), 1);
        assert_eq!(collab.connection_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let collab = Collab::new(MemoryDatabase::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(1, "Alice".into(), tx));
        collab.register(session);

        collab.shutdown();

        match rx.try_recv() {
            Ok(Outgoing::Close { code, .. }) => assert_eq!(code, CLOSE_NORMAL),
            other => panic!("expected a close directive, got {other:?}"),
        }
    }
}
