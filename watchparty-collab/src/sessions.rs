use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{protocol::ServerMessage, util::Id, UserId};

pub type SessionId = Id<Session>;

/// Close sent on voluntary disconnects, kicks, and shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close sent when required query parameters are missing or invalid.
pub const CLOSE_POLICY: u16 = 1008;
/// Close sent when the engine terminates an unresponsive session, so
/// clients can tell a reap from an ordinary disconnect.
pub const CLOSE_REAPED: u16 = 4000;

/// What the gateway's writer task pulls off a session sink.
#[derive(Debug, Clone)]
pub enum Outgoing {
    Frame(ServerMessage),
    /// Transport-level liveness probe.
    Ping,
    /// Instructs the writer to close the socket and stop.
    Close { code: u16, reason: String },
}

pub type OutgoingSender = mpsc::UnboundedSender<Outgoing>;
pub type OutgoingReceiver = mpsc::UnboundedReceiver<Outgoing>;

/// One live bidirectional connection. Owns nothing beyond its sink; the
/// socket itself stays with the gateway.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub username: String,
    sink: OutgoingSender,
    alive: AtomicBool,
    room_code: Mutex<Option<String>>,
}

impl Session {
    pub fn new(user_id: UserId, username: String, sink: OutgoingSender) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            username,
            sink,
            alive: AtomicBool::new(true),
            room_code: Mutex::new(None),
        }
    }

    /// Queues a frame. A failed send only marks the session dead; the
    /// reaper collects it.
    pub fn send(&self, message: ServerMessage) {
        if self.sink.send(Outgoing::Frame(message)).is_err() {
            self.alive.store(false, Ordering::Relaxed);
        }
    }

    pub fn ping(&self) {
        if self.sink.send(Outgoing::Ping).is_err() {
            self.alive.store(false, Ordering::Relaxed);
        }
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sink.send(Outgoing::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Whether the writer end of the transport is still attached.
    pub fn is_open(&self) -> bool {
        !self.sink.is_closed()
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clears the liveness flag, returning whether it was set. Called
    /// once per heartbeat interval; a `false` return means the previous
    /// probe went unanswered.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn room_code(&self) -> Option<String> {
        self.room_code.lock().clone()
    }

    pub fn set_room_code(&self, code: Option<String>) {
        *self.room_code.lock() = code;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_sink_marks_session_dead() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(1, "Alice".into(), tx);

        assert!(session.is_open());
        drop(rx);
        assert!(!session.is_open());

        session.send(ServerMessage::Pong);
        assert!(!session.take_alive());
    }

    #[test]
    fn heartbeat_flag_round_trip() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::new(1, "Alice".into(), tx);

        assert!(session.take_alive());
        assert!(!session.take_alive());

        session.mark_alive();
        assert!(session.take_alive());
    }
}
