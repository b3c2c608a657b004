use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query,
    },
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use log::{info, warn};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle, time::interval};

use watchparty_collab::{
    now_millis, ChatClientMessage, JoinRequest, Outgoing, OutgoingReceiver, PartyClientMessage,
    PgDatabase, Room, RoomError, ServerMessage, Session, UserId, CLOSE_POLICY, CLOSE_REAPED,
};

use crate::context::ServerContext;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Username used when the query string doesn't carry one.
const DEFAULT_USERNAME: &str = "Invitado";

const PARTY_TYPES: [&str; 11] = [
    "join",
    "chat_message",
    "playback_update",
    "participants_request",
    "sync_request",
    "invite_user",
    "remove_participant",
    "promote_to_cohost",
    "transfer_host",
    "leave",
    "ping",
];

const CHAT_TYPES: [&str; 4] = [
    "private_message",
    "friend_request",
    "friend_request_response",
    "ping",
];

#[derive(Debug, Deserialize)]
pub struct PartyQuery {
    room: Option<String>,
    user: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    user: Option<String>,
    username: Option<String>,
}

pub async fn watch_party_handler(
    ws: WebSocketUpgrade,
    context: ServerContext,
    Query(query): Query<PartyQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| party_session(socket, context, query))
}

pub async fn chat_handler(
    ws: WebSocketUpgrade,
    context: ServerContext,
    Query(query): Query<ChatQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| chat_session(socket, context, query))
}

async fn party_session(socket: WebSocket, context: ServerContext, query: PartyQuery) {
    let (user_id, username) = match identity(&query.user, &query.username) {
        Ok(pair) => pair,
        Err(reason) => return refuse(socket, reason).await,
    };

    let Some(room_param) = query.room.filter(|r| !r.trim().is_empty()) else {
        return refuse(socket, "Falta el parámetro room").await;
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let session = Arc::new(Session::new(user_id, username, tx));
    context.collab.register(session.clone());

    info!(
        "Watch-party session {} accepted for {} (room {room_param})",
        session.id, session.username
    );

    session.send(ServerMessage::Connected {
        user_id,
        username: session.username.clone(),
        timestamp: now_millis(),
    });

    let (sink, stream) = socket.split();
    let mut writer = spawn_writer(rx, sink);
    let mut reader = tokio::spawn(party_read_loop(
        stream,
        context.clone(),
        session.clone(),
        room_param,
    ));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    if let Some(code) = session.room_code() {
        context.collab.rooms.leave(&code, session.user_id);
    }
    context.collab.unregister(session.id);

    info!("Session {} closed", session.id);
}

async fn chat_session(socket: WebSocket, context: ServerContext, query: ChatQuery) {
    let (user_id, username) = match identity(&query.user, &query.username) {
        Ok(pair) => pair,
        Err(reason) => return refuse(socket, reason).await,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let session = Arc::new(Session::new(user_id, username, tx));
    context.collab.register(session.clone());
    context.collab.presence.attach(session.clone());

    info!("Chat session {} accepted for {}", session.id, session.username);

    session.send(ServerMessage::Connected {
        user_id,
        username: session.username.clone(),
        timestamp: now_millis(),
    });

    // Pending items go out before any live traffic for this session.
    context.collab.messaging.replay_pending(&session).await;

    let (sink, stream) = socket.split();
    let mut writer = spawn_writer(rx, sink);
    let mut reader = tokio::spawn(chat_read_loop(stream, context.clone(), session.clone()));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    context.collab.presence.detach(&session);
    context.collab.unregister(session.id);

    info!("Session {} closed", session.id);
}

/// Closes an accepted socket whose query string is unusable.
async fn refuse(mut socket: WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: CLOSE_POLICY,
        reason: reason.to_string().into(),
    };

    let _ = socket.send(Message::Close(Some(frame))).await;
}

fn identity(
    user: &Option<String>,
    username: &Option<String>,
) -> Result<(UserId, String), &'static str> {
    let raw = user
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or("Falta el parámetro user")?;

    let user_id = raw
        .trim()
        .parse()
        .map_err(|_| "El parámetro user debe ser numérico")?;

    let username = username
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USERNAME.to_string());

    Ok((user_id, username))
}

/// Drains the session sink into the socket. A failed send ends the
/// task, which tears the whole session down.
fn spawn_writer(
    mut rx: OutgoingReceiver,
    mut sink: SplitSink<WebSocket, Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let result = match item {
                Outgoing::Frame(message) => match serde_json::to_string(&message) {
                    Ok(text) => sink.send(Message::Text(text)).await,
                    Err(error) => {
                        warn!("Failed to serialize frame: {error}");
                        Ok(())
                    }
                },
                Outgoing::Ping => sink.send(Message::Ping(Vec::new())).await,
                Outgoing::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            };

            if result.is_err() {
                break;
            }
        }
    })
}

async fn party_read_loop(
    mut stream: SplitStream<WebSocket>,
    context: ServerContext,
    session: Arc<Session>,
    room_param: String,
) {
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Some(message) = parse_frame::<PartyClientMessage>(&session, &text, &PARTY_TYPES) else {
                        continue;
                    };

                    if let Err(error) = dispatch_party(&context, &session, &room_param, message) {
                        session.send(ServerMessage::Error {
                            message: error.client_message(),
                        });
                    }
                }
                Some(Ok(Message::Pong(_))) => session.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!("WebSocket error for {}: {error}", session.username);
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if !probe(&session) {
                    break;
                }
            }
        }
    }
}

async fn chat_read_loop(
    mut stream: SplitStream<WebSocket>,
    context: ServerContext,
    session: Arc<Session>,
) {
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Some(message) = parse_frame::<ChatClientMessage>(&session, &text, &CHAT_TYPES) else {
                        continue;
                    };

                    dispatch_chat(&context, &session, message).await;
                }
                Some(Ok(Message::Pong(_))) => session.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!("WebSocket error for {}: {error}", session.username);
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if !probe(&session) {
                    break;
                }
            }
        }
    }
}

/// One heartbeat interval: a session that never answered the previous
/// probe is terminated with a distinguishing close code.
fn probe(session: &Session) -> bool {
    if !session.take_alive() {
        info!("Session {} missed its heartbeat, terminating", session.id);
        session.close(CLOSE_REAPED, "Heartbeat timeout");
        return false;
    }

    session.ping();
    true
}

/// Parses one inbound frame. Malformed JSON earns an in-band error
/// frame and never ends the session; unknown `type` tags are dropped.
fn parse_frame<T: DeserializeOwned>(session: &Session, text: &str, known: &[&str]) -> Option<T> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => {
            warn!("Malformed frame from {}: {error}", session.username);
            session.send(ServerMessage::Error {
                message: "Formato de mensaje inválido".to_string(),
            });
            return None;
        }
    };

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => {
            session.send(ServerMessage::Error {
                message: "Formato de mensaje inválido".to_string(),
            });
            return None;
        }
    };

    if !known.contains(&kind.as_str()) {
        info!("Ignoring unknown message type {kind} from {}", session.username);
        return None;
    }

    match serde_json::from_value(value) {
        Ok(message) => Some(message),
        Err(error) => {
            warn!("Invalid {kind} frame from {}: {error}", session.username);
            session.send(ServerMessage::Error {
                message: "Formato de mensaje inválido".to_string(),
            });
            None
        }
    }
}

fn dispatch_party(
    context: &ServerContext,
    session: &Arc<Session>,
    room_param: &str,
    message: PartyClientMessage,
) -> Result<(), RoomError> {
    match message {
        PartyClientMessage::Join {
            create,
            user_id,
            room_name,
            video_id,
            max_participants,
            is_private,
        } => {
            if session.room_code().is_some() {
                return Err(RoomError::AlreadyInRoom);
            }

            let request = JoinRequest {
                create,
                user_id,
                room_name,
                video_id,
                max_participants,
                is_private,
            };

            let room = context.collab.rooms.join(room_param, session, request)?;
            session.set_room_code(Some(room.code.clone()));

            Ok(())
        }
        PartyClientMessage::ChatMessage { message } => {
            current_room(context, session)?.post_chat(session.user_id, &message)
        }
        PartyClientMessage::PlaybackUpdate {
            current_time,
            is_playing,
            event_type,
        } => current_room(context, session)?.update_playback(
            session.user_id,
            current_time,
            is_playing,
            event_type,
        ),
        PartyClientMessage::ParticipantsRequest => {
            current_room(context, session)?.participants_to(session);
            Ok(())
        }
        PartyClientMessage::SyncRequest => {
            current_room(context, session)?.sync_to(session);
            Ok(())
        }
        PartyClientMessage::InviteUser { username } => {
            current_room(context, session)?.invite(session.user_id, &username)
        }
        PartyClientMessage::RemoveParticipant { user_id } => {
            current_room(context, session)?.remove_participant(session.user_id, user_id)
        }
        PartyClientMessage::PromoteToCohost { user_id } => {
            current_room(context, session)?.promote_cohost(session.user_id, user_id)
        }
        PartyClientMessage::TransferHost { user_id } => {
            current_room(context, session)?.transfer_host(session.user_id, user_id)
        }
        PartyClientMessage::Leave => {
            if let Some(code) = session.room_code() {
                context.collab.rooms.leave(&code, session.user_id);
                session.set_room_code(None);
            }

            Ok(())
        }
        PartyClientMessage::Ping => {
            session.send(ServerMessage::Pong);
            Ok(())
        }
    }
}

async fn dispatch_chat(context: &ServerContext, session: &Arc<Session>, message: ChatClientMessage) {
    match message {
        ChatClientMessage::PrivateMessage {
            to,
            message,
            timestamp: _,
        } => {
            context
                .collab
                .messaging
                .send_private(session, to, &message)
                .await
        }
        ChatClientMessage::FriendRequest { to } => {
            context.collab.messaging.send_friend_request(session, to).await
        }
        ChatClientMessage::FriendRequestResponse {
            request_id,
            originator,
            status,
        } => {
            context
                .collab
                .messaging
                .respond_friend_request(session, request_id, originator, &status)
                .await
        }
        ChatClientMessage::Ping => session.send(ServerMessage::Pong),
    }
}

fn current_room(
    context: &ServerContext,
    session: &Session,
) -> Result<Arc<Room<PgDatabase>>, RoomError> {
    let code = session.room_code().ok_or(RoomError::NotInRoom)?;

    context
        .collab
        .rooms
        .get(&code)
        .ok_or(RoomError::RoomNotFound(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_requires_a_numeric_user() {
        assert!(identity(&None, &None).is_err());
        assert!(identity(&Some("abc".into()), &None).is_err());

        let (user_id, username) = identity(&Some("7".into()), &None).unwrap();
        assert_eq!(user_id, 7);
        assert_eq!(username, DEFAULT_USERNAME);

        let (_, username) = identity(&Some("7".into()), &Some("Alice".into())).unwrap();
        assert_eq!(username, "Alice");
    }

    #[test]
    fn known_type_lists_match_the_protocol() {
        for kind in PARTY_TYPES {
            let probe = format!(r#"{{"type":"{kind}"}}"#);
            let value: Value = serde_json::from_str(&probe).unwrap();
            assert_eq!(value["type"], kind);
        }

        assert!(CHAT_TYPES.contains(&"private_message"));
    }
}
