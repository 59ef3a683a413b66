// Room membership and viewer counts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use livechat_common::{protocol::chat::ServerEvent, types::Role};
use uuid::Uuid;

use super::session::SessionId;

/// A session's membership record within one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: Option<Uuid>,
    pub username: String,
    /// Role effective in this room, which may be lower than the token's.
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Emitted only when membership actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Joined { username: String, user_count: usize },
    Left { username: String, user_count: usize },
}

impl PresenceChange {
    pub fn into_event(self, timestamp: DateTime<Utc>) -> ServerEvent {
        let timestamp = timestamp.to_rfc3339();
        match self {
            Self::Joined { username, user_count } => {
                ServerEvent::UserJoined { username, user_count, timestamp }
            }
            Self::Left { username, user_count } => {
                ServerEvent::UserLeft { username, user_count, timestamp }
            }
        }
    }
}

/// Viewer count is always the number of distinct member sessions.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    members: HashMap<SessionId, Member>,
}

impl PresenceTracker {
    /// Idempotent: re-adding a present session changes nothing.
    pub fn add(&mut self, session_id: SessionId, member: Member) -> Option<PresenceChange> {
        if self.members.contains_key(&session_id) {
            return None;
        }

        let username = member.username.clone();
        self.members.insert(session_id, member);
        Some(PresenceChange::Joined { username, user_count: self.members.len() })
    }

    /// Idempotent: removing an absent session changes nothing.
    pub fn remove(&mut self, session_id: SessionId) -> Option<PresenceChange> {
        let member = self.members.remove(&session_id)?;
        Some(PresenceChange::Left { username: member.username, user_count: self.members.len() })
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Member> {
        self.members.get(&session_id)
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.members.contains_key(&session_id)
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
