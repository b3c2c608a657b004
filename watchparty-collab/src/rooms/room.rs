use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    db::Database,
    protocol::{ChatEntry, ParticipantInfo, PlaybackEventKind, ServerMessage},
    sessions::{Session, CLOSE_NORMAL},
    util::{now_millis, random_string},
    CollabContext, UserId,
};

use super::{JoinRequest, RoomError};

/// Chat messages kept per room before the oldest is evicted.
pub const MAX_CHAT_HISTORY: usize = 200;
/// Playback events kept per room.
pub const MAX_PLAYBACK_HISTORY: usize = 50;
/// How much chat history a joining participant is replayed.
pub const CHAT_REPLAY: usize = 50;

pub const DEFAULT_MAX_PARTICIPANTS: u32 = 10;

/// In-memory playback state updates immediately; the store sees at most
/// one write per room within this window.
const PLAYBACK_PERSIST_INTERVAL: Duration = Duration::from_secs(1);

/// A participant as tracked inside a room.
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
    pub session: Arc<Session>,
    pub joined_at: i64,
    pub last_seen: i64,
    pub is_host: bool,
}

/// One playback transition, kept for late-join context.
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub user_id: UserId,
    pub position: f64,
    pub playing: bool,
    pub kind: PlaybackEventKind,
    pub timestamp: i64,
}

/// The public-listing shape of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room_code: String,
    pub room_name: String,
    pub host_username: String,
    pub participant_count: usize,
    pub max_participants: u32,
    pub video_id: Option<String>,
    pub created_at: i64,
}

/// A named watch-party room. All mutable state sits behind one mutex so
/// every mutation and its fan-out happen in a single total order.
pub struct Room<Db> {
    context: CollabContext<Db>,
    /// Stable internal id, distinct from the client-visible code.
    pub id: String,
    pub code: String,
    created_at: i64,
    state: Mutex<RoomState>,
}

impl<Db> std::fmt::Debug for Room<Db> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

struct RoomState {
    name: String,
    video_id: Option<String>,
    max_participants: u32,
    is_private: bool,
    host_user_id: UserId,
    host_username: String,
    current_time: f64,
    is_playing: bool,
    participants: HashMap<UserId, Participant>,
    messages: VecDeque<ChatEntry>,
    playback_history: VecDeque<PlaybackEvent>,
    next_message_id: u64,
    empty_since: Option<Instant>,
    last_playback_persist: Option<Instant>,
}

impl<Db: Database> Room<Db> {
    pub fn new(
        context: &CollabContext<Db>,
        code: String,
        request: &JoinRequest,
        host_id: UserId,
        host_name: &str,
    ) -> Self {
        let name = request
            .room_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Sala de {host_name}"));

        let max_participants = request
            .max_participants
            .unwrap_or(DEFAULT_MAX_PARTICIPANTS)
            .max(1);

        Self {
            context: context.clone(),
            id: random_string(8),
            code,
            created_at: now_millis(),
            state: Mutex::new(RoomState {
                name,
                video_id: request.video_id.clone(),
                max_participants,
                is_private: request.is_private,
                host_user_id: host_id,
                host_username: host_name.to_string(),
                current_time: 0.0,
                is_playing: false,
                participants: HashMap::new(),
                messages: VecDeque::new(),
                playback_history: VecDeque::new(),
                next_message_id: 1,
                empty_since: None,
                last_playback_persist: None,
            }),
        }
    }

    /// Admits a session as a participant, replaying room state to the
    /// caller and announcing it to everyone else.
    pub fn join(&self, session: &Arc<Session>, creating: bool) -> Result<(), RoomError> {
        let user_id = session.user_id;
        let username = session.username.clone();

        {
            let mut state = self.state.lock();

            if state.participants.contains_key(&user_id) {
                // A rejoin replaces the transport but keeps seniority.
                let existing = state
                    .participants
                    .get_mut(&user_id)
                    .expect("participant exists on rejoin");

                existing.session = session.clone();
                existing.username = username.clone();
                existing.last_seen = now_millis();
            } else {
                if state.is_private && !creating {
                    return Err(RoomError::RoomPrivate(self.code.clone()));
                }

                if state.participants.len() >= state.max_participants as usize {
                    return Err(RoomError::RoomFull(self.code.clone()));
                }

                let now = now_millis();
                let is_host = state.host_user_id == user_id;

                state.participants.insert(
                    user_id,
                    Participant {
                        user_id,
                        username: username.clone(),
                        session: session.clone(),
                        joined_at: now,
                        last_seen: now,
                        is_host,
                    },
                );
            }

            state.empty_since = None;

            let participants = state.participant_infos();
            let timestamp = now_millis();

            session.send(ServerMessage::RoomJoined {
                room_code: self.code.clone(),
                room_name: state.name.clone(),
                video_id: state.video_id.clone(),
                is_host: state.host_user_id == user_id,
                host_user_id: state.host_user_id,
                host_username: state.host_username.clone(),
                max_participants: state.max_participants,
                participants: participants.clone(),
                current_time: state.current_time,
                is_playing: state.is_playing,
                timestamp,
            });

            state.broadcast(
                ServerMessage::UserJoined {
                    user_id,
                    username: username.clone(),
                    timestamp,
                },
                Some(user_id),
            );

            state.broadcast(
                ServerMessage::ParticipantsUpdate {
                    participants,
                    timestamp,
                },
                None,
            );

            let replay_from = state.messages.len().saturating_sub(CHAT_REPLAY);
            session.send(ServerMessage::ChatHistory {
                messages: state.messages.iter().skip(replay_from).cloned().collect(),
                timestamp,
            });

            session.send(ServerMessage::PlaybackSync {
                current_time: state.current_time,
                is_playing: state.is_playing,
                timestamp,
            });
        }

        info!("User {username} joined room {}", self.code);

        let db = self.context.database.clone();
        let code = self.code.clone();
        spawn_store("participant touch", async move {
            db.touch_party_participant(&code, user_id).await
        });

        Ok(())
    }

    /// Appends a chat message and fans it out to every participant,
    /// sender included, so all clients observe the authoritative order.
    pub fn post_chat(&self, user_id: UserId, body: &str) -> Result<(), RoomError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(RoomError::EmptyMessage);
        }

        let body = body.to_string();

        {
            let mut state = self.state.lock();

            let participant = state
                .participants
                .get_mut(&user_id)
                .ok_or(RoomError::NotInRoom)?;

            participant.last_seen = now_millis();
            let username = participant.username.clone();

            let id = state.next_message_id;
            state.next_message_id += 1;

            let entry = ChatEntry {
                id,
                user_id,
                username,
                message: body.clone(),
                timestamp: now_millis(),
            };

            state.messages.push_back(entry.clone());
            if state.messages.len() > MAX_CHAT_HISTORY {
                state.messages.pop_front();
            }

            state.broadcast(
                ServerMessage::ChatMessage {
                    id: entry.id,
                    user_id: entry.user_id,
                    username: entry.username,
                    message: entry.message,
                    timestamp: entry.timestamp,
                },
                None,
            );
        }

        let db = self.context.database.clone();
        let code = self.code.clone();
        spawn_store("party message", async move {
            db.insert_party_message(&code, user_id, &body).await
        });

        Ok(())
    }

    /// Applies a playback transition and fans it out to everyone except
    /// the originator.
    pub fn update_playback(
        &self,
        user_id: UserId,
        position: f64,
        playing: bool,
        kind: PlaybackEventKind,
    ) -> Result<(), RoomError> {
        let position = position.max(0.0);
        let mut persist = false;

        {
            let mut state = self.state.lock();

            let participant = state
                .participants
                .get_mut(&user_id)
                .ok_or(RoomError::NotInRoom)?;
            participant.last_seen = now_millis();

            state.current_time = position;
            state.is_playing = playing;

            let timestamp = now_millis();

            state.playback_history.push_back(PlaybackEvent {
                user_id,
                position,
                playing,
                kind,
                timestamp,
            });
            if state.playback_history.len() > MAX_PLAYBACK_HISTORY {
                state.playback_history.pop_front();
            }

            state.broadcast(
                ServerMessage::PlaybackUpdate {
                    user_id,
                    current_time: position,
                    is_playing: playing,
                    event_type: kind,
                    timestamp,
                },
                Some(user_id),
            );

            let due = state
                .last_playback_persist
                .map_or(true, |at| at.elapsed() >= PLAYBACK_PERSIST_INTERVAL);
            if due {
                state.last_playback_persist = Some(Instant::now());
                persist = true;
            }
        }

        if persist {
            let db = self.context.database.clone();
            let code = self.code.clone();
            spawn_store("playback position", async move {
                db.update_party_playback(&code, position, playing).await
            });
        }

        Ok(())
    }

    /// Replies to the caller only with the current playback snapshot.
    pub fn sync_to(&self, session: &Session) {
        let state = self.state.lock();

        session.send(ServerMessage::PlaybackSync {
            current_time: state.current_time,
            is_playing: state.is_playing,
            timestamp: now_millis(),
        });
    }

    /// Replies to the caller only with the current participant list.
    pub fn participants_to(&self, session: &Session) {
        let state = self.state.lock();

        session.send(ServerMessage::ParticipantsList {
            participants: state.participant_infos(),
            timestamp: now_millis(),
        });
    }

    /// Host-only. Announces an invitation to the whole room.
    pub fn invite(&self, sender_id: UserId, username: &str) -> Result<(), RoomError> {
        let mut state = self.state.lock();
        state.require_host(sender_id)?;

        let invited_by = state.host_username.clone();

        state.broadcast(
            ServerMessage::InvitationSent {
                username: username.to_string(),
                invited_by,
                timestamp: now_millis(),
            },
            None,
        );

        Ok(())
    }

    /// Host-only. Closes the target's session and removes it from the
    /// room, announcing the removal to everyone remaining.
    pub fn remove_participant(&self, sender_id: UserId, target: UserId) -> Result<(), RoomError> {
        let mut state = self.state.lock();
        state.require_host(sender_id)?;

        if target == sender_id {
            return Err(RoomError::TargetIsSelf);
        }

        let removed = state
            .participants
            .remove(&target)
            .ok_or(RoomError::TargetNotInRoom)?;

        removed
            .session
            .close(CLOSE_NORMAL, "Fuiste eliminado de la sala");

        let timestamp = now_millis();

        state.broadcast(
            ServerMessage::UserLeft {
                user_id: target,
                username: removed.username.clone(),
                timestamp,
            },
            None,
        );
        state.broadcast(
            ServerMessage::ParticipantsUpdate {
                participants: state.participant_infos(),
                timestamp,
            },
            None,
        );
        state.broadcast(
            ServerMessage::SystemMessage {
                message: format!("{} fue eliminado de la sala", removed.username),
                timestamp,
            },
            None,
        );

        info!("User {} removed from room {}", removed.username, self.code);

        Ok(())
    }

    /// Host-only. Co-host status is an announcement; authority stays
    /// with the single host.
    pub fn promote_cohost(&self, sender_id: UserId, target: UserId) -> Result<(), RoomError> {
        let mut state = self.state.lock();
        state.require_host(sender_id)?;

        let username = state
            .participants
            .get(&target)
            .ok_or(RoomError::TargetNotInRoom)?
            .username
            .clone();

        state.broadcast(
            ServerMessage::SystemMessage {
                message: format!("{username} ahora es co-anfitrión"),
                timestamp: now_millis(),
            },
            None,
        );

        Ok(())
    }

    /// Host-only. Reassigns host authority to another participant.
    pub fn transfer_host(&self, sender_id: UserId, target: UserId) -> Result<(), RoomError> {
        let mut state = self.state.lock();
        state.require_host(sender_id)?;

        if !state.participants.contains_key(&target) {
            return Err(RoomError::TargetNotInRoom);
        }

        state.assign_host(target);

        state.broadcast(
            ServerMessage::SystemMessage {
                message: format!("{} es ahora el anfitrión", state.host_username),
                timestamp: now_millis(),
            },
            None,
        );

        Ok(())
    }

    /// Removes a participant, running host succession and announcing
    /// the departure. Returns whether the room is now empty. Removing a
    /// user who already left is a no-op.
    pub fn leave(&self, user_id: UserId) -> bool {
        let mut state = self.state.lock();

        let Some(departed) = state.participants.remove(&user_id) else {
            return state.participants.is_empty();
        };

        // Succession happens before fan-out so the participant list
        // already carries the new host flag.
        let mut new_host = None;
        if departed.is_host {
            if let Some(successor) = state.next_host() {
                state.assign_host(successor);
                new_host = Some(state.host_username.clone());
            }
        }

        let timestamp = now_millis();

        state.broadcast(
            ServerMessage::UserLeft {
                user_id,
                username: departed.username.clone(),
                timestamp,
            },
            None,
        );
        state.broadcast(
            ServerMessage::ParticipantsUpdate {
                participants: state.participant_infos(),
                timestamp,
            },
            None,
        );

        if let Some(host_username) = new_host {
            state.broadcast(
                ServerMessage::SystemMessage {
                    message: format!("{host_username} es ahora el anfitrión"),
                    timestamp,
                },
                None,
            );
        }

        info!("User {} left room {}", departed.username, self.code);

        if state.participants.is_empty() {
            state.empty_since = Some(Instant::now());
            true
        } else {
            false
        }
    }

    /// Drops participants whose transport is gone, via the normal leave
    /// path so succession and fan-out still fire. Returns whether the
    /// room ended up empty.
    pub fn sweep_closed(&self) -> bool {
        let closed: Vec<UserId> = {
            let state = self.state.lock();
            state
                .participants
                .values()
                .filter(|p| !p.session.is_open())
                .map(|p| p.user_id)
                .collect()
        };

        let mut empty = self.is_empty();
        for user_id in closed {
            empty = self.leave(user_id);
        }

        empty
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().participants.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().participants.len()
    }

    /// How long the room has been empty, if it is.
    pub fn empty_for(&self) -> Option<Duration> {
        self.state.lock().empty_since.map(|at| at.elapsed())
    }

    pub fn is_private(&self) -> bool {
        self.state.lock().is_private
    }

    pub fn host(&self) -> (UserId, String) {
        let state = self.state.lock();
        (state.host_user_id, state.host_username.clone())
    }

    pub fn playback(&self) -> (f64, bool) {
        let state = self.state.lock();
        (state.current_time, state.is_playing)
    }

    pub fn chat_len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn playback_history_len(&self) -> usize {
        self.state.lock().playback_history.len()
    }

    pub fn summary(&self) -> RoomSummary {
        let state = self.state.lock();

        RoomSummary {
            room_code: self.code.clone(),
            room_name: state.name.clone(),
            host_username: state.host_username.clone(),
            participant_count: state.participants.len(),
            max_participants: state.max_participants,
            video_id: state.video_id.clone(),
            created_at: self.created_at,
        }
    }
}

impl RoomState {
    /// Sends a frame to every participant whose transport is open,
    /// optionally skipping one user. Sink sends never block, so fan-out
    /// under the room lock preserves the mutation order.
    fn broadcast(&self, message: ServerMessage, exclude: Option<UserId>) {
        for participant in self.participants.values() {
            if exclude == Some(participant.user_id) {
                continue;
            }

            if participant.session.is_open() {
                participant.session.send(message.clone());
            }
        }
    }

    fn participant_infos(&self) -> Vec<ParticipantInfo> {
        let mut infos: Vec<_> = self
            .participants
            .values()
            .map(|p| ParticipantInfo {
                user_id: p.user_id,
                username: p.username.clone(),
                is_host: p.is_host,
                joined_at: p.joined_at,
            })
            .collect();

        infos.sort_by_key(|p| (p.joined_at, p.user_id));
        infos
    }

    fn require_host(&self, user_id: UserId) -> Result<(), RoomError> {
        if !self.participants.contains_key(&user_id) {
            return Err(RoomError::NotInRoom);
        }

        if self.host_user_id != user_id {
            return Err(RoomError::NotHost);
        }

        Ok(())
    }

    /// The deterministic successor: earliest join, ties broken by the
    /// lower user id.
    fn next_host(&self) -> Option<UserId> {
        self.participants
            .values()
            .min_by_key(|p| (p.joined_at, p.user_id))
            .map(|p| p.user_id)
    }

    /// Moves the host flag. Callers announce the transition themselves
    /// so it lands after their own fan-out.
    fn assign_host(&mut self, new_host: UserId) {
        for participant in self.participants.values_mut() {
            participant.is_host = participant.user_id == new_host;
        }

        let Some(host) = self.participants.get(&new_host) else {
            return;
        };

        self.host_user_id = host.user_id;
        self.host_username = host.username.clone();
    }
}

fn spawn_store<F>(action: &'static str, operation: F)
where
    F: Future<Output = crate::db::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(error) = operation.await {
            warn!("Store write ({action}) failed: {error}");
        }
    });
}
