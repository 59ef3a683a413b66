// A single stream's chat room.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use livechat_common::{
    protocol::chat::{ChatMessageView, ServerEvent},
    types::Role,
};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{info_span, warn, Instrument};

use super::{
    bus::MessageBus,
    history::{Author, DeleteOutcome, HistoryStore, Message, MessageKind},
    moderation::{Actor, ModerationAction, ModerationEngine},
    presence::{Member, PresenceTracker},
    session::SessionId,
};
use crate::{error::ChatError, metrics};

pub const SYSTEM_USERNAME: &str = "system";

/// Capacities applied to every room a registry creates.
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    pub history_capacity: usize,
    pub queue_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            history_capacity: super::history::DEFAULT_HISTORY_CAPACITY,
            queue_capacity: super::bus::DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

/// Something to publish, before it has a sequence id.
#[derive(Debug, Clone)]
pub enum Draft {
    /// A member's message. Author details come from the room's presence
    /// record, so the effective role is always the one granted at join.
    User { session_id: SessionId, body: String },
    System { body: String },
    Bot { name: String, body: String },
}

#[derive(Debug)]
pub struct RoomJoin {
    pub history: Vec<ChatMessageView>,
    pub user_count: usize,
    /// `None` when the session was already a member and keeps its queue.
    pub deliveries: Option<mpsc::Receiver<ServerEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomLeave {
    pub was_member: bool,
    pub remaining: usize,
    /// How many times the room has been left empty, including this leave.
    pub vacancy: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStats {
    pub room_id: String,
    pub total_messages: u64,
    pub active_users: usize,
}

impl RoomStats {
    pub fn empty(room_id: impl Into<String>) -> Self {
        Self { room_id: room_id.into(), total_messages: 0, active_users: 0 }
    }

    pub fn into_event(self) -> ServerEvent {
        ServerEvent::ChatStats {
            room_id: self.room_id,
            total_messages: self.total_messages,
            active_users: self.active_users,
        }
    }
}

#[derive(Debug)]
struct RoomState {
    history: HistoryStore,
    presence: PresenceTracker,
    bus: MessageBus,
    total_messages: u64,
    vacancies: u64,
    retired: bool,
}

impl RoomState {
    /// Assign the next sequence id, append to history and fan out.
    fn record(&mut self, room_id: &str, draft: Draft) -> Result<ChatMessageView, ChatError> {
        let (author, body, kind) = match draft {
            Draft::User { session_id, body } => {
                let Some(member) = self.presence.get(session_id) else {
                    return Err(ChatError::NotJoined);
                };
                let author = Author {
                    session_id: Some(session_id),
                    user_id: member.user_id,
                    username: member.username.clone(),
                    role: member.role,
                };
                (author, body, MessageKind::User)
            }
            Draft::System { body } => (
                Author {
                    session_id: None,
                    user_id: None,
                    username: SYSTEM_USERNAME.to_string(),
                    role: Role::Viewer,
                },
                body,
                MessageKind::System,
            ),
            Draft::Bot { name, body } => (
                Author { session_id: None, user_id: None, username: name, role: Role::Moderator },
                body,
                MessageKind::Bot,
            ),
        };

        let message = Message {
            id: self.bus.next_sequence(),
            room_id: room_id.to_string(),
            author,
            body,
            timestamp: Utc::now(),
            status: Default::default(),
            kind,
        };
        let view = message.view();
        self.history.append(message);
        self.total_messages += 1;
        self.broadcast(room_id, ServerEvent::NewMessage(view.clone()));

        Ok(view)
    }

    /// Fan out `event`, then announce any sessions the bus had to drop.
    ///
    /// Dropped sessions leave presence here, so each one produces exactly
    /// one `user_left` for the members that remain.
    fn broadcast(&mut self, room_id: &str, event: ServerEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for session_id in self.bus.fan_out(&event) {
                let Some(change) = self.presence.remove(session_id) else {
                    continue;
                };
                warn!(
                    room_id = %room_id,
                    session_id = %session_id,
                    "outbound queue unavailable, evicting session"
                );
                metrics::increment_slow_consumer_evictions();
                pending.push_back(change.into_event(Utc::now()));
            }
        }
    }
}

/// Every mutation of a room goes through its single write lock, which is
/// what gives all members the same total order of events.
#[derive(Debug)]
pub struct Room {
    id: String,
    created_at: DateTime<Utc>,
    state: RwLock<RoomState>,
}

impl Room {
    pub fn new(id: impl Into<String>, settings: RoomSettings) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            state: RwLock::new(RoomState {
                history: HistoryStore::new(settings.history_capacity),
                presence: PresenceTracker::default(),
                bus: MessageBus::new(settings.queue_capacity),
                total_messages: 0,
                vacancies: 0,
                retired: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Add a session to the room.
    ///
    /// The history snapshot and the new subscription are taken under the
    /// same lock, so the joiner sees every message exactly once: either in
    /// the snapshot or on its queue. Returns `None` if the room has been
    /// retired and the caller must fetch a fresh one.
    pub async fn join(&self, session_id: SessionId, member: Member) -> Option<RoomJoin> {
        let mut state = self.state.write().await;
        if state.retired {
            return None;
        }

        if state.presence.contains(session_id) && state.bus.is_subscribed(session_id) {
            return Some(RoomJoin {
                history: state.history.snapshot(),
                user_count: state.presence.count(),
                deliveries: None,
            });
        }

        let deliveries = state.bus.subscribe(session_id);
        let history = state.history.snapshot();
        let change = state.presence.add(session_id, member);
        let user_count = state.presence.count();
        if let Some(change) = change {
            state.broadcast(&self.id, change.into_event(Utc::now()));
        }

        Some(RoomJoin { history, user_count, deliveries: Some(deliveries) })
    }

    /// Remove a session. Safe to call for sessions that are not members.
    pub async fn leave(&self, session_id: SessionId) -> RoomLeave {
        let mut state = self.state.write().await;
        state.bus.unsubscribe(session_id);
        let was_member = match state.presence.remove(session_id) {
            Some(change) => {
                state.broadcast(&self.id, change.into_event(Utc::now()));
                true
            }
            None => false,
        };

        let remaining = state.presence.count();
        if was_member && remaining == 0 {
            state.vacancies += 1;
        }

        RoomLeave { was_member, remaining, vacancy: state.vacancies }
    }

    /// Assign the next sequence id, record the message and deliver it.
    pub async fn publish(&self, draft: Draft) -> Result<ChatMessageView, ChatError> {
        let (view, _) = self.publish_with_reply(draft, |_| None).await?;
        Ok(view)
    }

    /// Publish `draft`, then whatever `reply` derives from it, under one
    /// lock. Nothing else can be sequenced between the two.
    ///
    /// `reply` only runs once the first message is recorded and should
    /// produce a bot or system draft.
    pub async fn publish_with_reply<F>(
        &self,
        draft: Draft,
        reply: F,
    ) -> Result<(ChatMessageView, Option<ChatMessageView>), ChatError>
    where
        F: FnOnce(&ChatMessageView) -> Option<Draft>,
    {
        async move {
            let mut state = self.state.write().await;
            if state.retired {
                return Err(ChatError::RoomUnavailable { room_id: self.id.clone() });
            }

            let view = state.record(&self.id, draft)?;
            let reply = match reply(&view) {
                Some(draft) => Some(state.record(&self.id, draft)?),
                None => None,
            };

            Ok((view, reply))
        }
        .instrument(info_span!("relay.room.publish", room_id = %self.id))
        .await
    }

    /// Redact a retained message on behalf of a member.
    ///
    /// Returns the recorded action, or `None` if the message was already
    /// deleted.
    pub async fn delete_message(
        &self,
        session_id: SessionId,
        message_id: u64,
        moderation: &ModerationEngine,
    ) -> Result<Option<ModerationAction>, ChatError> {
        let mut state = self.state.write().await;
        let Some(member) = state.presence.get(session_id).cloned() else {
            return Err(ChatError::NotJoined);
        };
        let Some(target) = state.history.get(message_id) else {
            return Err(ChatError::NotFound { message_id });
        };
        moderation.authorize_delete(Actor { session_id, member: &member }, target)?;

        let outcome =
            state.history.mark_deleted(message_id).ok_or(ChatError::NotFound { message_id })?;
        if outcome == DeleteOutcome::AlreadyDeleted {
            return Ok(None);
        }
        state.broadcast(&self.id, ServerEvent::MessageDeleted { message_id });

        Ok(Some(ModerationAction::delete(session_id, message_id)))
    }

    pub async fn stats(&self) -> RoomStats {
        let state = self.state.read().await;
        RoomStats {
            room_id: self.id.clone(),
            total_messages: state.total_messages,
            active_users: state.presence.count(),
        }
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.presence.count()
    }

    pub async fn is_member(&self, session_id: SessionId) -> bool {
        self.state.read().await.presence.contains(session_id)
    }

    pub async fn history(&self) -> Vec<ChatMessageView> {
        self.state.read().await.history.snapshot()
    }

    /// Mark the room retired if nobody is in it. A retired room refuses
    /// joins and publications, and its state is dropped with the last
    /// reference.
    ///
    /// `vacancy` must match the latest leave that emptied the room, so a
    /// check made on behalf of an earlier vacancy does nothing.
    pub(crate) async fn retire_if_empty(&self, vacancy: u64) -> bool {
        let mut state = self.state.write().await;
        if !state.presence.is_empty() {
            return false;
        }
        if vacancy != state.vacancies {
            return false;
        }
        state.retired = true;
        true
    }

    pub async fn is_retired(&self) -> bool {
        self.state.read().await.retired
    }
}
