// Bounded per-room message history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use livechat_common::{
    protocol::chat::{ChatMessageView, DELETED_PLACEHOLDER},
    types::{MessageStatus, Role},
};
use uuid::Uuid;

use super::session::SessionId;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Who wrote a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub session_id: Option<SessionId>,
    pub user_id: Option<Uuid>,
    pub username: String,
    pub role: Role,
}

impl Author {
    /// Same user when both carry a user id, otherwise same session.
    pub fn is_same_actor(&self, session_id: SessionId, user_id: Option<Uuid>) -> bool {
        match (self.user_id, user_id) {
            (Some(author), Some(actor)) => author == actor,
            _ => self.session_id == Some(session_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    User,
    System,
    Bot,
}

/// A message after it has been assigned its sequence id.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub room_id: String,
    pub author: Author,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub kind: MessageKind,
}

impl Message {
    /// Deleted messages render the placeholder, never the original body.
    pub fn view(&self) -> ChatMessageView {
        let message = match self.status {
            MessageStatus::Visible => self.body.clone(),
            MessageStatus::Deleted => DELETED_PLACEHOLDER.to_string(),
        };

        ChatMessageView {
            id: self.id,
            room_id: self.room_id.clone(),
            username: self.author.username.clone(),
            message,
            timestamp: self.timestamp.to_rfc3339(),
            status: self.status,
            is_system: self.kind == MessageKind::System,
            is_bot: self.kind == MessageKind::Bot,
            is_broadcaster: self.author.role == Role::Broadcaster,
            is_moderator: self.author.role == Role::Moderator,
        }
    }

    pub fn is_moderatable(&self) -> bool {
        self.kind == MessageKind::User
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyDeleted,
}

/// Ring buffer of the most recent messages, ordered by sequence id.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    entries: VecDeque<Message>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    /// Append a message, evicting the oldest entry once full.
    ///
    /// Callers append in sequence order, which keeps `entries` sorted by id.
    pub fn append(&mut self, message: Message) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    pub fn get(&self, message_id: u64) -> Option<&Message> {
        let index = self.entries.binary_search_by_key(&message_id, |message| message.id).ok()?;
        self.entries.get(index)
    }

    /// `None` when the id is not (or no longer) retained.
    pub fn mark_deleted(&mut self, message_id: u64) -> Option<DeleteOutcome> {
        let index = self.entries.binary_search_by_key(&message_id, |message| message.id).ok()?;
        let message = self.entries.get_mut(index)?;
        if message.status == MessageStatus::Deleted {
            return Some(DeleteOutcome::AlreadyDeleted);
        }
        message.status = MessageStatus::Deleted;
        Some(DeleteOutcome::Deleted)
    }

    /// Retained messages, oldest first.
    pub fn snapshot(&self) -> Vec<ChatMessageView> {
        self.entries.iter().map(Message::view).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
