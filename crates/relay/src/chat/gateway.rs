// Session lifecycle and client operations.

use std::sync::Arc;

use chrono::Utc;
use livechat_common::{
    protocol::chat::{ChatMessageView, ServerEvent},
    types::Role,
    validation::MAX_MESSAGE_CHARS,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use super::{
    bot::{ChatBot, NoBot},
    bus,
    moderation::{ModerationEngine, ModerationVerdict},
    presence::Member,
    registry::RoomRegistry,
    room::{Draft, RoomStats},
    session::{Identity, Session},
};
use crate::{
    error::ChatError,
    metrics,
    streams::{MemoryStreamDirectory, StreamDirectory},
};

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub max_message_chars: usize,
    /// Publish an `is_system` message whenever a session joins a room.
    pub announce_joins: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self { max_message_chars: MAX_MESSAGE_CHARS, announce_joins: false }
    }
}

#[derive(Debug)]
pub struct JoinOutcome {
    pub room_id: String,
    pub history: Vec<ChatMessageView>,
    pub user_count: usize,
    /// A fresh delivery queue, or `None` if the session stays on its
    /// current one.
    pub deliveries: Option<mpsc::Receiver<ServerEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Published(ChatMessageView),
    Blocked { reason: String },
}

/// Entry point for everything a connected client can do.
pub struct ChatGateway {
    registry: Arc<RoomRegistry>,
    directory: Arc<dyn StreamDirectory>,
    moderation: ModerationEngine,
    bot: Arc<dyn ChatBot>,
    settings: GatewaySettings,
}

impl Default for ChatGateway {
    fn default() -> Self {
        Self::new(
            Arc::new(RoomRegistry::default()),
            Arc::new(MemoryStreamDirectory::all_live()),
            ModerationEngine::default(),
            Arc::new(NoBot),
            GatewaySettings::default(),
        )
    }
}

impl ChatGateway {
    pub fn new(
        registry: Arc<RoomRegistry>,
        directory: Arc<dyn StreamDirectory>,
        moderation: ModerationEngine,
        bot: Arc<dyn ChatBot>,
        settings: GatewaySettings,
    ) -> Self {
        Self { registry, directory, moderation, bot, settings }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn connect(&self, identity: Identity) -> Session {
        let session = Session::new(identity);
        metrics::session_connected();
        info!(
            session_id = %session.id(),
            username = %session.username(),
            role = session.identity().role.as_str(),
            "chat session connected"
        );
        session
    }

    /// Join `room_id`, leaving any other room first.
    ///
    /// Joining the room the session is already in returns a fresh history
    /// snapshot and leaves presence untouched.
    pub async fn join(
        &self,
        session: &mut Session,
        room_id: &str,
    ) -> Result<JoinOutcome, ChatError> {
        if session.is_closed() {
            return Err(ChatError::Connection);
        }

        let room_id = room_id.trim();
        if room_id.is_empty() || !self.directory.is_stream_live(room_id) {
            debug!(session_id = %session.id(), room_id = %room_id, "join refused, stream offline");
            return Err(ChatError::RoomUnavailable { room_id: room_id.to_string() });
        }

        if session.room_id().is_some_and(|current| current != room_id) {
            self.leave(session).await;
        }

        let identity = session.identity();
        let member = Member {
            user_id: identity.user_id,
            username: identity.username.clone(),
            role: self.effective_role(identity, room_id),
            joined_at: Utc::now(),
        };

        loop {
            let room = self.registry.get_or_create(room_id).await;
            let Some(joined) = room.join(session.id(), member.clone()).await else {
                debug!(room_id = %room_id, "room retired during join, retrying");
                continue;
            };

            session.set_room(Arc::clone(&room));
            if joined.deliveries.is_some() {
                info!(
                    session_id = %session.id(),
                    room_id = %room_id,
                    username = %member.username,
                    user_count = joined.user_count,
                    "session joined room"
                );
                if self.settings.announce_joins {
                    let body = format!("{} joined the chat", member.username);
                    if let Err(error) = room.publish(Draft::System { body }).await {
                        warn!(room_id = %room_id, %error, "failed to announce join");
                    }
                }
            }

            return Ok(JoinOutcome {
                room_id: room_id.to_string(),
                history: joined.history,
                user_count: joined.user_count,
                deliveries: joined.deliveries,
            });
        }
    }

    /// Leave the current room, if any. Returns whether the session was
    /// still a member.
    pub async fn leave(&self, session: &mut Session) -> bool {
        let Some(room) = session.take_room() else {
            return false;
        };

        let outcome = room.leave(session.id()).await;
        if outcome.was_member {
            info!(
                session_id = %session.id(),
                room_id = %room.id(),
                username = %session.username(),
                user_count = outcome.remaining,
                "session left room"
            );
        }
        if outcome.remaining == 0 {
            self.registry.schedule_retire(&room, outcome.vacancy).await;
        }

        outcome.was_member
    }

    /// Release everything the session holds. Idempotent.
    pub async fn disconnect(&self, session: &mut Session) {
        if session.is_closed() {
            return;
        }

        session.mark_closed();
        self.leave(session).await;
        metrics::session_disconnected();
        info!(
            session_id = %session.id(),
            username = %session.username(),
            connected_for_secs = (Utc::now() - session.connected_at()).num_seconds(),
            "chat session disconnected"
        );
    }

    /// Validate, moderate and publish a user message.
    pub async fn send_message(
        &self,
        session: &mut Session,
        room_id: &str,
        body: &str,
    ) -> Result<SendOutcome, ChatError> {
        if session.is_closed() {
            return Err(ChatError::Connection);
        }

        let room = match session.room() {
            Some(room) if room.id() == room_id => Arc::clone(room),
            _ => return Err(ChatError::NotJoined),
        };

        let body = bus::validate_body(body, self.settings.max_message_chars)?;

        let session_id = session.id();
        let verdict = self.moderation.block_before_publish(
            session_id,
            &body,
            session.send_window_mut(),
            Instant::now(),
        );
        if let ModerationVerdict::Block(action) = verdict {
            metrics::increment_messages_blocked(action.reason());
            info!(
                action = action.kind.as_str(),
                session_id = %action.actor,
                room_id = %room_id,
                username = %session.username(),
                reason = action.reason(),
                at = %action.timestamp.to_rfc3339(),
                "message blocked"
            );
            return Ok(SendOutcome::Blocked { reason: action.reason().to_string() });
        }

        let bot = &self.bot;
        let (view, reply) = room
            .publish_with_reply(Draft::User { session_id, body }, |view| {
                bot.respond(view).map(|body| Draft::Bot { name: bot.name().to_string(), body })
            })
            .await?;
        metrics::increment_messages_published();
        debug!(
            session_id = %session_id,
            room_id = %room_id,
            message_id = view.id,
            "message published"
        );
        if let Some(reply) = reply {
            metrics::increment_messages_published();
            debug!(room_id = %room_id, message_id = reply.id, bot = %reply.username, "bot replied");
        }

        Ok(SendOutcome::Published(view))
    }

    /// Delete a message in the session's current room.
    pub async fn delete_message(
        &self,
        session: &Session,
        message_id: u64,
    ) -> Result<(), ChatError> {
        if session.is_closed() {
            return Err(ChatError::Connection);
        }

        let room = session.room().ok_or(ChatError::NotJoined)?;
        let action = room.delete_message(session.id(), message_id, &self.moderation).await?;
        if let Some(action) = action {
            metrics::increment_messages_deleted();
            info!(
                action = action.kind.as_str(),
                session_id = %action.actor,
                room_id = %room.id(),
                message_id = action.target_message_id,
                at = %action.timestamp.to_rfc3339(),
                "message deleted"
            );
        }

        Ok(())
    }

    /// Counters for `room_id`. Rooms that do not exist report zeros.
    pub async fn stats(&self, room_id: &str) -> RoomStats {
        match self.registry.get(room_id).await {
            Some(room) => room.stats().await,
            None => RoomStats::empty(room_id),
        }
    }

    /// A broadcaster token only counts in the stream the user owns.
    fn effective_role(&self, identity: &Identity, room_id: &str) -> Role {
        if identity.role != Role::Broadcaster {
            return identity.role;
        }

        match (self.directory.broadcaster_of(room_id), identity.user_id) {
            (None, _) => Role::Broadcaster,
            (Some(owner), Some(user_id)) if owner == user_id => Role::Broadcaster,
            _ => Role::Viewer,
        }
    }
}
