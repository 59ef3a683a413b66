// Per-connection chat session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use livechat_common::types::Role;
use uuid::Uuid;

use super::{moderation::SendWindow, room::Room};

pub type SessionId = Uuid;

/// Who is behind a connection, resolved once at upgrade time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// `None` for anonymous viewers.
    pub user_id: Option<Uuid>,
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn authenticated(user_id: Uuid, username: impl Into<String>, role: Role) -> Self {
        Self { user_id: Some(user_id), username: username.into(), role }
    }

    pub fn anonymous(alias: impl Into<String>) -> Self {
        Self { user_id: None, username: alias.into(), role: Role::Anonymous }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

/// One live client connection.
///
/// Owned by the connection task. The session never holds a handle into a
/// room's state, only the room itself, so every mutation goes through the
/// room's serialization point.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    identity: Identity,
    connected_at: DateTime<Utc>,
    room: Option<Arc<Room>>,
    send_window: SendWindow,
    closed: bool,
}

impl Session {
    pub(crate) fn new(identity: Identity) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            connected_at: Utc::now(),
            room: None,
            send_window: SendWindow::default(),
            closed: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room.as_deref().map(Room::id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn room(&self) -> Option<&Arc<Room>> {
        self.room.as_ref()
    }

    pub(crate) fn set_room(&mut self, room: Arc<Room>) {
        self.room = Some(room);
    }

    pub(crate) fn take_room(&mut self) -> Option<Arc<Room>> {
        self.room.take()
    }

    pub(crate) fn send_window_mut(&mut self) -> &mut SendWindow {
        &mut self.send_window
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use livechat_common::types::Role;
    use uuid::Uuid;

    use super::{Identity, Session};

    #[test]
    fn new_session_starts_outside_any_room() {
        let session = Session::new(Identity::anonymous("Anonymous-0001"));
        assert!(session.room_id().is_none());
        assert!(!session.is_closed());
        assert_eq!(session.username(), "Anonymous-0001");
        assert!(session.identity().is_anonymous());
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let identity = Identity::authenticated(Uuid::new_v4(), "alice", Role::Viewer);
        let first = Session::new(identity.clone());
        let second = Session::new(identity);
        assert_ne!(first.id(), second.id());
    }
}
