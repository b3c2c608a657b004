use serde::{Deserialize, Deserializer, Serialize};

use crate::UserId;

/// Frames a watch-party client may send. The gateway drops frames whose
/// `type` tag is unknown before they reach this enum.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartyClientMessage {
    Join {
        #[serde(default)]
        create: bool,
        /// Optional identity claim. When present it must match the
        /// connecting session.
        user_id: Option<UserId>,
        room_name: Option<String>,
        video_id: Option<String>,
        max_participants: Option<u32>,
        #[serde(default)]
        is_private: bool,
    },
    ChatMessage {
        message: String,
    },
    PlaybackUpdate {
        current_time: f64,
        is_playing: bool,
        #[serde(default)]
        event_type: PlaybackEventKind,
    },
    ParticipantsRequest,
    SyncRequest,
    InviteUser {
        username: String,
    },
    RemoveParticipant {
        user_id: UserId,
    },
    PromoteToCohost {
        user_id: UserId,
    },
    TransferHost {
        user_id: UserId,
    },
    Leave,
    Ping,
}

/// Frames a private-chat client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatClientMessage {
    PrivateMessage {
        to: UserId,
        message: String,
        /// Client-side timestamp; the server stamps its own.
        #[serde(default)]
        timestamp: Option<i64>,
    },
    FriendRequest {
        to: UserId,
    },
    FriendRequestResponse {
        request_id: i64,
        originator: UserId,
        status: String,
    },
    Ping,
}

/// The kind of a playback transition. Unknown kinds fold to `update` so
/// a newer client cannot poison a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackEventKind {
    Play,
    Pause,
    Seek,
    #[default]
    Update,
}

impl<'de> Deserialize<'de> for PlaybackEventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;

        Ok(match raw.as_str() {
            "play" => Self::Play,
            "pause" => Self::Pause,
            "seek" => Self::Seek,
            _ => Self::Update,
        })
    }
}

/// A participant as listed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub username: String,
    pub is_host: bool,
    pub joined_at: i64,
}

/// One room chat message, as broadcast and as replayed in history.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub id: u64,
    pub user_id: UserId,
    pub username: String,
    pub message: String,
    pub timestamp: i64,
}

/// Every frame the server can emit, across both domains.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        user_id: UserId,
        username: String,
        timestamp: i64,
    },
    RoomJoined {
        room_code: String,
        room_name: String,
        video_id: Option<String>,
        is_host: bool,
        host_user_id: UserId,
        host_username: String,
        max_participants: u32,
        participants: Vec<ParticipantInfo>,
        current_time: f64,
        is_playing: bool,
        timestamp: i64,
    },
    UserJoined {
        user_id: UserId,
        username: String,
        timestamp: i64,
    },
    UserLeft {
        user_id: UserId,
        username: String,
        timestamp: i64,
    },
    ParticipantsUpdate {
        participants: Vec<ParticipantInfo>,
        timestamp: i64,
    },
    ParticipantsList {
        participants: Vec<ParticipantInfo>,
        timestamp: i64,
    },
    ChatMessage {
        id: u64,
        user_id: UserId,
        username: String,
        message: String,
        timestamp: i64,
    },
    ChatHistory {
        messages: Vec<ChatEntry>,
        timestamp: i64,
    },
    PlaybackUpdate {
        user_id: UserId,
        current_time: f64,
        is_playing: bool,
        event_type: PlaybackEventKind,
        timestamp: i64,
    },
    PlaybackSync {
        current_time: f64,
        is_playing: bool,
        timestamp: i64,
    },
    InvitationSent {
        username: String,
        invited_by: String,
        timestamp: i64,
    },
    SystemMessage {
        message: String,
        timestamp: i64,
    },
    Error {
        message: String,
    },
    Pong,
    PrivateMessage {
        /// Server-assigned id; absent when the store write failed.
        id: Option<i64>,
        sender_id: UserId,
        sender_username: String,
        message: String,
        timestamp: i64,
    },
    FriendRequest {
        /// Present on replayed requests, absent on live notifications
        /// (the request row is persisted by the HTTP API).
        request_id: Option<i64>,
        sender_id: UserId,
        sender_username: String,
        timestamp: i64,
    },
    FriendRequestResponse {
        request_id: i64,
        responder_id: UserId,
        status: String,
        timestamp: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_deserialize() {
        let join: PartyClientMessage = serde_json::from_str(
            r#"{"type":"join","create":true,"video_id":"vX","max_participants":10,"is_private":false}"#,
        )
        .unwrap();

        match join {
            PartyClientMessage::Join {
                create, is_private, ..
            } => {
                assert!(create);
                assert!(!is_private);
            }
            other => panic!("parsed wrong variant: {other:?}"),
        }

        let bare_join: PartyClientMessage = serde_json::from_str(r#"{"type":"join"}"#).unwrap();
        assert!(matches!(
            bare_join,
            PartyClientMessage::Join { create: false, .. }
        ));

        let sync: PartyClientMessage = serde_json::from_str(r#"{"type":"sync_request"}"#).unwrap();
        assert!(matches!(sync, PartyClientMessage::SyncRequest));
    }

    #[test]
    fn unknown_event_kind_folds_to_update() {
        let message: PartyClientMessage = serde_json::from_str(
            r#"{"type":"playback_update","current_time":42.0,"is_playing":true,"event_type":"rewind"}"#,
        )
        .unwrap();

        match message {
            PartyClientMessage::PlaybackUpdate { event_type, .. } => {
                assert_eq!(event_type, PlaybackEventKind::Update);
            }
            other => panic!("parsed wrong variant: {other:?}"),
        }
    }

    #[test]
    fn server_frames_carry_snake_case_tags() {
        let frame = ServerMessage::ChatMessage {
            id: 1,
            user_id: 2,
            username: "Bob".into(),
            message: "hello".into(),
            timestamp: 1234,
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["id"], 1);
        assert_eq!(value["user_id"], 2);
        assert_eq!(value["message"], "hello");

        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong["type"], "pong");
    }
}
