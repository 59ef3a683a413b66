// WebSocket event types for the stream chat protocol.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MessageStatus, Role};

/// Body shown in place of a message that a moderator or its author deleted.
pub const DELETED_PLACEHOLDER: &str = "[Message deleted]";

/// Client -> Server events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join the chat room of a live stream. Implicitly leaves any other room.
    JoinStreamChat { room_id: String },

    /// Leave the chat room without closing the connection.
    LeaveStreamChat { room_id: String },

    /// Publish a chat message into the joined room.
    SendMessage { room_id: String, message: String },

    /// Redact a message in the joined room.
    DeleteMessage { message_id: u64 },

    /// Request counters for a room.
    GetChatStats { room_id: String },
}

/// Server -> Client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once after the WebSocket upgrade.
    ConnectionStatus {
        status: String,
        session_id: Uuid,
        username: String,
        role: Role,
        timestamp: String,
    },

    /// Join completed.
    JoinSuccess { room_id: String, user_count: usize },

    /// Ordered history snapshot, oldest first.
    ChatHistory { room_id: String, messages: Vec<ChatMessageView> },

    /// One published message.
    NewMessage(ChatMessageView),

    /// Presence change: a session joined the room.
    UserJoined { username: String, user_count: usize, timestamp: String },

    /// Presence change: a session left the room.
    UserLeft { username: String, user_count: usize, timestamp: String },

    /// Pre-publish rejection, addressed to the sender only.
    MessageBlocked { reason: String },

    /// Redaction instruction. Carries the id only, never the content.
    MessageDeleted { message_id: u64 },

    /// Room counters.
    ChatStats { room_id: String, total_messages: u64, active_users: usize },

    /// Non-fatal protocol or validation error.
    Error { code: String, message: String },
}

/// A message as rendered to clients, either live or from history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessageView {
    pub id: u64,
    pub room_id: String,
    pub username: String,
    pub message: String,
    pub timestamp: String,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_broadcaster: bool,
    #[serde(default)]
    pub is_moderator: bool,
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error { code: code.into(), message: message.into() }
    }

    /// The wire name of this event, used for logging and metrics labels.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionStatus { .. } => "connection_status",
            Self::JoinSuccess { .. } => "join_success",
            Self::ChatHistory { .. } => "chat_history",
            Self::NewMessage(_) => "new_message",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::MessageBlocked { .. } => "message_blocked",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ChatStats { .. } => "chat_stats",
            Self::Error { .. } => "error",
        }
    }
}

impl ClientEvent {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JoinStreamChat { .. } => "join_stream_chat",
            Self::LeaveStreamChat { .. } => "leave_stream_chat",
            Self::SendMessage { .. } => "send_message",
            Self::DeleteMessage { .. } => "delete_message",
            Self::GetChatStats { .. } => "get_chat_stats",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_view() -> ChatMessageView {
        ChatMessageView {
            id: 7,
            room_id: "42".into(),
            username: "A".into(),
            message: "hello".into(),
            timestamp: "2026-02-07T00:00:00+00:00".into(),
            status: MessageStatus::Visible,
            is_system: false,
            is_bot: false,
            is_broadcaster: false,
            is_moderator: false,
        }
    }

    #[test]
    fn client_events_decode_from_tagged_json() {
        let join: ClientEvent =
            serde_json::from_str(r#"{"type":"join_stream_chat","room_id":"42"}"#).unwrap();
        assert_eq!(join, ClientEvent::JoinStreamChat { room_id: "42".into() });

        let send: ClientEvent =
            serde_json::from_str(r#"{"type":"send_message","room_id":"42","message":"hi"}"#)
                .unwrap();
        assert_eq!(send.kind(), "send_message");
    }

    #[test]
    fn unknown_client_event_type_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"ban_user"}"#).is_err());
    }

    #[test]
    fn new_message_flattens_view_next_to_type_tag() {
        let value = serde_json::to_value(ServerEvent::NewMessage(sample_view())).unwrap();
        assert_eq!(value["type"], "new_message");
        assert_eq!(value["username"], "A");
        assert_eq!(value["message"], "hello");
        assert_eq!(value["is_bot"], false);
        assert_eq!(value["status"], "visible");
    }

    #[test]
    fn new_message_decodes_back_into_view() {
        let raw = serde_json::to_string(&ServerEvent::NewMessage(sample_view())).unwrap();
        let decoded: ServerEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded, ServerEvent::NewMessage(sample_view()));
    }

    #[test]
    fn view_flags_default_when_absent() {
        let view: ChatMessageView = serde_json::from_str(
            r#"{"id":1,"room_id":"1","username":"u","message":"m","timestamp":"t"}"#,
        )
        .unwrap();
        assert_eq!(view.status, MessageStatus::Visible);
        assert!(!view.is_bot && !view.is_system);
    }

    #[test]
    fn message_deleted_carries_only_the_id() {
        let value = serde_json::to_value(ServerEvent::MessageDeleted { message_id: 3 }).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["message_id", "type"]);
    }
}
