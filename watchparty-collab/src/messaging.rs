use log::warn;

use crate::{
    db::Database,
    protocol::ServerMessage,
    sessions::Session,
    util::now_millis,
    CollabContext, UserId,
};

/// Items replayed to a freshly connected chat session, per kind.
pub const REPLAY_LIMIT: i64 = 10;

/// Persists private messages and friendship-lifecycle events, delivers
/// them to online recipients, and replays pending items on connect.
pub struct Messaging<Db> {
    context: CollabContext<Db>,
}

impl<Db: Database> Messaging<Db> {
    pub fn new(context: &CollabContext<Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Persists a direct message and pushes it to every session of an
    /// online receiver. When the store write fails the live frame still
    /// goes out, without a server id; an offline receiver picks the row
    /// up through replay instead.
    pub async fn send_private(&self, sender: &Session, to: UserId, body: &str) {
        let body = body.trim();
        if body.is_empty() {
            sender.send(ServerMessage::Error {
                message: "El mensaje no puede estar vacío".to_string(),
            });
            return;
        }

        let stored = self
            .context
            .database
            .insert_private_message(sender.user_id, to, body)
            .await;

        let (id, timestamp) = match &stored {
            Ok(row) => (Some(row.id), row.created_at.timestamp_millis()),
            Err(error) => {
                warn!("Failed to persist private message from {}: {error}", sender.user_id);
                (None, now_millis())
            }
        };

        let frame = ServerMessage::PrivateMessage {
            id,
            sender_id: sender.user_id,
            sender_username: sender.username.clone(),
            message: body.to_string(),
            timestamp,
        };

        for session in self.context.sessions_of(to) {
            session.send(frame.clone());
        }
    }

    /// Live notification only; the request row itself is persisted by
    /// the HTTP API.
    pub async fn send_friend_request(&self, sender: &Session, to: UserId) {
        let frame = ServerMessage::FriendRequest {
            request_id: None,
            sender_id: sender.user_id,
            sender_username: sender.username.clone(),
            timestamp: now_millis(),
        };

        for session in self.context.sessions_of(to) {
            session.send(frame.clone());
        }
    }

    pub async fn respond_friend_request(
        &self,
        responder: &Session,
        request_id: i64,
        originator: UserId,
        status: &str,
    ) {
        let frame = ServerMessage::FriendRequestResponse {
            request_id,
            responder_id: responder.user_id,
            status: status.to_string(),
            timestamp: now_millis(),
        };

        for session in self.context.sessions_of(originator) {
            session.send(frame.clone());
        }
    }

    /// Delivers what accrued while the user was offline: unread direct
    /// messages first, then pending friendship requests, both newest
    /// first and capped. Store errors are logged and the session
    /// continues.
    pub async fn replay_pending(&self, session: &Session) {
        match self
            .context
            .database
            .unread_messages_for(session.user_id, REPLAY_LIMIT)
            .await
        {
            Ok(messages) => {
                for message in messages {
                    session.send(ServerMessage::PrivateMessage {
                        id: Some(message.id),
                        sender_id: message.sender_id,
                        sender_username: message.sender_username,
                        message: message.message,
                        timestamp: message.created_at.timestamp_millis(),
                    });
                }
            }
            Err(error) => {
                warn!("Failed to replay messages for {}: {error}", session.user_id);
            }
        }

        match self
            .context
            .database
            .pending_friend_requests_for(session.user_id, REPLAY_LIMIT)
            .await
        {
            Ok(requests) => {
                for request in requests {
                    session.send(ServerMessage::FriendRequest {
                        request_id: Some(request.id),
                        sender_id: request.user_id,
                        sender_username: request.requester_username,
                        timestamp: request.created_at.timestamp_millis(),
                    });
                }
            }
            Err(error) => {
                warn!("Failed to replay friend requests for {}: {error}", session.user_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        db::MemoryDatabase,
        sessions::{Outgoing, OutgoingReceiver},
        Collab,
    };
    use tokio::sync::mpsc;

    fn session(user_id: UserId, username: &str) -> (Arc<Session>, OutgoingReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Session::new(user_id, username.into(), tx)), rx)
    }

    fn frames(rx: &mut OutgoingReceiver) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outgoing::Frame(frame) = item {
                out.push(frame);
            }
        }
        out
    }

    #[tokio::test]
    async fn online_receiver_gets_the_stored_message() {
        let collab = Collab::new(MemoryDatabase::new());
        collab.database().put_username(1, "Alice");

        let (alice, _alice_rx) = session(1, "Alice");
        let (bob, mut bob_rx) = session(2, "Bob");
        collab.presence.attach(bob.clone());

        collab.messaging.send_private(&alice, 2, " hola ").await;

        let received = frames(&mut bob_rx);
        assert_eq!(received.len(), 1);
        match &received[0] {
            ServerMessage::PrivateMessage {
                id,
                sender_id,
                message,
                ..
            } => {
                assert!(id.is_some());
                assert_eq!(*sender_id, 1);
                assert_eq!(message, "hola");
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        assert_eq!(collab.database().message_count(), 1);
    }

    #[tokio::test]
    async fn offline_receiver_gets_no_push_but_the_row_persists() {
        let collab = Collab::new(MemoryDatabase::new());

        let (alice, _alice_rx) = session(1, "Alice");
        collab.messaging.send_private(&alice, 2, "hola").await;

        assert_eq!(collab.database().message_count(), 1);

        // The row is waiting for the receiver's next connect.
        let pending = collab.database().unread_messages_for(2, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_still_delivers_live_without_an_id() {
        let collab = Collab::new(MemoryDatabase::new());
        collab.database().set_failing(true);

        let (alice, _alice_rx) = session(1, "Alice");
        let (bob, mut bob_rx) = session(2, "Bob");
        collab.presence.attach(bob.clone());

        collab.messaging.send_private(&alice, 2, "hola").await;

        let received = frames(&mut bob_rx);
        assert!(matches!(
            received.last(),
            Some(ServerMessage::PrivateMessage { id: None, .. })
        ));
    }

    #[tokio::test]
    async fn replay_delivers_unread_newest_first_with_original_timestamps() {
        let collab = Collab::new(MemoryDatabase::new());
        collab.database().put_username(1, "Alice");

        let first = collab.database().seed_unread_message(1, 5, "primera");
        let second = collab.database().seed_unread_message(1, 5, "segunda");

        let (x, mut x_rx) = session(5, "X");
        collab.presence.attach(x.clone());
        collab.messaging.replay_pending(&x).await;

        let received = frames(&mut x_rx);
        let ids: Vec<_> = received
            .iter()
            .filter_map(|f| match f {
                ServerMessage::PrivateMessage { id, .. } => Some(id.unwrap()),
                _ => None,
            })
            .collect();

        assert_eq!(ids, vec![second, first]);

        let timestamps: Vec<_> = received
            .iter()
            .filter_map(|f| match f {
                ServerMessage::PrivateMessage { timestamp, .. } => Some(*timestamp),
                _ => None,
            })
            .collect();
        assert!(timestamps[0] > timestamps[1], "original timestamps survive");
    }

    #[tokio::test]
    async fn replay_is_capped_per_kind() {
        let collab = Collab::new(MemoryDatabase::new());

        for n in 0..15 {
            collab
                .database()
                .seed_unread_message(1, 5, &format!("m{n}"));
        }
        for n in 0..12 {
            collab.database().seed_pending_request(100 + n, 5);
        }

        let (x, mut x_rx) = session(5, "X");
        collab.messaging.replay_pending(&x).await;

        let received = frames(&mut x_rx);
        let messages = received
            .iter()
            .filter(|f| matches!(f, ServerMessage::PrivateMessage { .. }))
            .count();
        let requests = received
            .iter()
            .filter(|f| matches!(f, ServerMessage::FriendRequest { .. }))
            .count();

        assert_eq!(messages, REPLAY_LIMIT as usize);
        assert_eq!(requests, REPLAY_LIMIT as usize);
    }

    #[tokio::test]
    async fn replay_survives_a_dead_store() {
        let collab = Collab::new(MemoryDatabase::new());
        collab.database().set_failing(true);

        let (x, mut x_rx) = session(5, "X");
        collab.messaging.replay_pending(&x).await;

        assert!(frames(&mut x_rx).is_empty());
        assert!(x.is_open());
    }

    #[tokio::test]
    async fn friend_request_round_trip_reaches_both_parties() {
        let collab = Collab::new(MemoryDatabase::new());

        let (requester, mut requester_rx) = session(1, "Alice");
        let (target, mut target_rx) = session(2, "Bob");
        collab.presence.attach(requester.clone());
        collab.presence.attach(target.clone());

        collab.messaging.send_friend_request(&requester, 2).await;

        let received = frames(&mut target_rx);
        assert!(matches!(
            received.last(),
            Some(ServerMessage::FriendRequest {
                request_id: None,
                sender_id: 1,
                ..
            })
        ));

        collab
            .messaging
            .respond_friend_request(&target, 33, 1, "accepted")
            .await;

        let received = frames(&mut requester_rx);
        match received.last() {
            Some(ServerMessage::FriendRequestResponse {
                request_id,
                responder_id,
                status,
                ..
            }) => {
                assert_eq!(*request_id, 33);
                assert_eq!(*responder_id, 2);
                assert_eq!(status, "accepted");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
