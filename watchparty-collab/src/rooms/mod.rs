mod room;

use std::sync::Arc;
use std::time::Duration;

use log::info;
use thiserror::Error;

pub use room::*;

use crate::{db::Database, sessions::Session, CollabContext, UserId};

/// How long an emptied room lingers before the deferred check deletes it.
pub const EMPTY_ROOM_GRACE: Duration = Duration::from_secs(5 * 60);
/// Backstop: the sweeper evicts rooms that stayed empty this long.
pub const EMPTY_ROOM_MAX_IDLE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room {0} does not exist")]
    RoomNotFound(String),
    #[error("Room {0} is full")]
    RoomFull(String),
    #[error("Room {0} is private")]
    RoomPrivate(String),
    #[error("Session is already in a room")]
    AlreadyInRoom,
    #[error("User is not a participant of this room")]
    NotInRoom,
    #[error("Target user is not a participant of this room")]
    TargetNotInRoom,
    #[error("Only the host may perform this action")]
    NotHost,
    #[error("The host cannot remove themselves")]
    TargetIsSelf,
    #[error("Message body is empty")]
    EmptyMessage,
    #[error("Join claims a user id that does not match the session")]
    IdentityMismatch,
}

impl RoomError {
    /// The refusal text shown to clients, as the production apps expect
    /// it.
    pub fn client_message(&self) -> String {
        let text = match self {
            RoomError::RoomNotFound(_) => "Sala no encontrada",
            RoomError::RoomFull(_) => "La sala está llena",
            RoomError::RoomPrivate(_) => "Esta sala es privada. Necesitas una invitación.",
            RoomError::AlreadyInRoom => "Ya estás en una sala",
            RoomError::NotInRoom => "No estás en una sala",
            RoomError::TargetNotInRoom => "Ese usuario no está en la sala",
            RoomError::NotHost => "Solo el anfitrión puede realizar esta acción",
            RoomError::TargetIsSelf => "No puedes eliminarte a ti mismo",
            RoomError::EmptyMessage => "El mensaje no puede estar vacío",
            RoomError::IdentityMismatch => "La identidad no coincide con la sesión",
        };

        text.to_string()
    }
}

/// What a `join` frame asks for, beyond the session's own identity.
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub create: bool,
    pub user_id: Option<UserId>,
    pub room_name: Option<String>,
    pub video_id: Option<String>,
    pub max_participants: Option<u32>,
    pub is_private: bool,
}

/// Owns the set of active rooms and their lifecycle policies.
pub struct RoomManager<Db> {
    context: CollabContext<Db>,
}

impl<Db: Database> RoomManager<Db> {
    pub fn new(context: &CollabContext<Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub fn get(&self, code: &str) -> Option<Arc<Room<Db>>> {
        self.context.rooms.get(&normalize(code)).map(|r| r.clone())
    }

    /// Joins a session to a room, creating the room lazily when the
    /// request carries the `create` flag.
    pub fn join(
        &self,
        code: &str,
        session: &Arc<Session>,
        request: JoinRequest,
    ) -> Result<Arc<Room<Db>>, RoomError> {
        let code = normalize(code);

        if let Some(claimed) = request.user_id {
            if claimed != session.user_id {
                return Err(RoomError::IdentityMismatch);
            }
        }

        let room = match self.context.rooms.get(&code).map(|r| r.clone()) {
            Some(existing) => existing,
            None => {
                if !request.create {
                    return Err(RoomError::RoomNotFound(code));
                }

                let room = self
                    .context
                    .rooms
                    .entry(code.clone())
                    .or_insert_with(|| {
                        info!("Room {code} created by {}", session.username);
                        Arc::new(Room::new(
                            &self.context,
                            code.clone(),
                            &request,
                            session.user_id,
                            &session.username,
                        ))
                    })
                    .clone();

                room
            }
        };

        room.join(session, request.create)?;

        Ok(room)
    }

    /// Removes a participant from a room; an emptied room is scheduled
    /// for the deferred eviction check.
    pub fn leave(&self, code: &str, user_id: UserId) {
        if let Some(room) = self.get(code) {
            if room.leave(user_id) {
                self.schedule_eviction(room.code.clone());
            }
        }
    }

    fn schedule_eviction(&self, code: String) {
        let rooms = self.context.rooms.clone();

        tokio::spawn(async move {
            tokio::time::sleep(EMPTY_ROOM_GRACE).await;

            let still_empty = rooms.get(&code).map(|r| r.is_empty()).unwrap_or(false);
            if still_empty {
                rooms.remove(&code);
                info!("Room {code} evicted after grace period");
            }
        });
    }

    /// One reaper pass: drop dead participants, then evict rooms that
    /// stayed empty past the backstop threshold.
    pub fn sweep(&self) {
        let mut stale = Vec::new();

        for entry in self.context.rooms.iter() {
            let room = entry.value();
            room.sweep_closed();

            if room.empty_for().map_or(false, |d| d >= EMPTY_ROOM_MAX_IDLE) {
                stale.push(room.code.clone());
            }
        }

        for code in stale {
            self.context.rooms.remove(&code);
            info!("Room {code} evicted by sweeper");
        }
    }

    /// Rooms listed on the public directory: not private, not empty.
    pub fn public_rooms(&self) -> Vec<RoomSummary> {
        self.context
            .rooms
            .iter()
            .filter(|r| !r.is_private() && !r.is_empty())
            .map(|r| r.summary())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.context.rooms.len()
    }
}

fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}
