// Pre-publish moderation and delete authorization.

use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use super::{history::Message, presence::Member, session::SessionId};
use crate::error::ChatError;

pub const RATE_LIMITED_REASON: &str = "rate_limited";
pub const INAPPROPRIATE_CONTENT_REASON: &str = "inappropriate_content";

pub const DEFAULT_RATE_LIMIT_MAX_MESSAGES: usize = 5;
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_BANNED_WORDS: &[&str] = &["spam", "scam", "fake", "bot", "hack", "cheat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationActionKind {
    BlockMessage,
    DeleteMessage,
}

impl ModerationActionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlockMessage => "block_message",
            Self::DeleteMessage => "delete_message",
        }
    }
}

/// A moderation decision that took effect.
///
/// Blocks act before a message exists, so they carry no target id. Deletes
/// always name the message they redacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationAction {
    pub kind: ModerationActionKind,
    pub target_message_id: Option<u64>,
    pub actor: SessionId,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

impl ModerationAction {
    pub fn block(actor: SessionId, reason: &str) -> Self {
        Self {
            kind: ModerationActionKind::BlockMessage,
            target_message_id: None,
            actor,
            timestamp: Utc::now(),
            reason: Some(reason.to_string()),
        }
    }

    pub fn delete(actor: SessionId, message_id: u64) -> Self {
        Self {
            kind: ModerationActionKind::DeleteMessage,
            target_message_id: Some(message_id),
            actor,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    /// The reason shown to the sender of a blocked message.
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Allow,
    Block(ModerationAction),
}

/// Timestamps of a session's recently accepted messages.
#[derive(Debug, Default)]
pub struct SendWindow {
    sent: VecDeque<Instant>,
}

impl SendWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.sent.front().copied() {
            if now.duration_since(oldest) >= window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }
}

#[derive(Debug, Clone)]
pub struct ModerationPolicy {
    /// `0` disables the rate limit.
    pub rate_limit_max_messages: usize,
    pub rate_limit_window: Duration,
    pub banned_words: Vec<String>,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            rate_limit_max_messages: DEFAULT_RATE_LIMIT_MAX_MESSAGES,
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            banned_words: DEFAULT_BANNED_WORDS.iter().map(|word| word.to_string()).collect(),
        }
    }
}

/// Who is asking to act on a message, as seen by the room.
#[derive(Debug, Clone, Copy)]
pub struct Actor<'a> {
    pub session_id: SessionId,
    pub member: &'a Member,
}

#[derive(Debug, Clone)]
pub struct ModerationEngine {
    policy: ModerationPolicy,
}

impl Default for ModerationEngine {
    fn default() -> Self {
        Self::new(ModerationPolicy::default())
    }
}

impl ModerationEngine {
    pub fn new(mut policy: ModerationPolicy) -> Self {
        policy.banned_words = policy
            .banned_words
            .iter()
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        Self { policy }
    }

    pub fn policy(&self) -> &ModerationPolicy {
        &self.policy
    }

    /// Decide whether a validated user message may be published.
    ///
    /// The rate limit is checked first; only allowed messages count against
    /// the window. System and bot messages never pass through here.
    pub fn block_before_publish(
        &self,
        actor: SessionId,
        body: &str,
        window: &mut SendWindow,
        now: Instant,
    ) -> ModerationVerdict {
        if self.policy.rate_limit_max_messages > 0 {
            window.prune(now, self.policy.rate_limit_window);
            if window.len() >= self.policy.rate_limit_max_messages {
                debug!(sent = window.len(), "send window exhausted");
                return ModerationVerdict::Block(ModerationAction::block(
                    actor,
                    RATE_LIMITED_REASON,
                ));
            }
        }

        if self.contains_banned_word(body) {
            return ModerationVerdict::Block(ModerationAction::block(
                actor,
                INAPPROPRIATE_CONTENT_REASON,
            ));
        }

        window.sent.push_back(now);
        ModerationVerdict::Allow
    }

    /// Authors may delete their own messages. Broadcasters and moderators
    /// may delete anyone's. System and bot messages are never deletable.
    pub fn authorize_delete(&self, actor: Actor<'_>, target: &Message) -> Result<(), ChatError> {
        if !target.is_moderatable() {
            return Err(ChatError::Authorization(
                "system and bot messages cannot be deleted".to_string(),
            ));
        }

        if actor.member.role.can_moderate()
            || target.author.is_same_actor(actor.session_id, actor.member.user_id)
        {
            return Ok(());
        }

        Err(ChatError::Authorization(
            "only the author or a moderator can delete this message".to_string(),
        ))
    }

    fn contains_banned_word(&self, body: &str) -> bool {
        if self.policy.banned_words.is_empty() {
            return false;
        }

        let lowered = body.to_lowercase();
        lowered
            .split(|character: char| !character.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .any(|word| self.policy.banned_words.iter().any(|banned| banned == word))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use livechat_common::types::{MessageStatus, Role};
    use tokio::time::Instant;
    use uuid::Uuid;

    use super::*;
    use crate::chat::history::{Author, MessageKind};

    fn engine(max: usize, window_secs: u64) -> ModerationEngine {
        ModerationEngine::new(ModerationPolicy {
            rate_limit_max_messages: max,
            rate_limit_window: Duration::from_secs(window_secs),
            banned_words: vec!["spam".into(), " Scam ".into()],
        })
    }

    fn member(role: Role, user_id: Option<Uuid>) -> Member {
        Member { user_id, username: "m".into(), role, joined_at: Utc::now() }
    }

    fn message(author_session: Uuid, author_user: Option<Uuid>, kind: MessageKind) -> Message {
        Message {
            id: 1,
            room_id: "42".into(),
            author: Author {
                session_id: Some(author_session),
                user_id: author_user,
                username: "author".into(),
                role: Role::Viewer,
            },
            body: "hello".into(),
            timestamp: Utc::now(),
            status: MessageStatus::Visible,
            kind,
        }
    }

    #[test]
    fn rate_limit_blocks_after_max_messages_in_window() {
        let engine = engine(5, 10);
        let mut window = SendWindow::default();
        let actor = Uuid::new_v4();
        let start = Instant::now();

        for _ in 0..5 {
            let verdict = engine.block_before_publish(actor, "hi", &mut window, start);
            assert_eq!(verdict, ModerationVerdict::Allow);
        }
        assert!(matches!(
            engine.block_before_publish(actor, "hi", &mut window, start),
            ModerationVerdict::Block(action) if action.reason() == RATE_LIMITED_REASON
        ));

        let later = start + Duration::from_secs(10);
        let verdict = engine.block_before_publish(actor, "hi", &mut window, later);
        assert_eq!(verdict, ModerationVerdict::Allow);
    }

    #[test]
    fn blocked_messages_do_not_consume_the_window() {
        let engine = engine(2, 10);
        let mut window = SendWindow::default();
        let actor = Uuid::new_v4();
        let now = Instant::now();

        assert!(matches!(
            engine.block_before_publish(actor, "pure spam", &mut window, now),
            ModerationVerdict::Block(_)
        ));
        assert_eq!(window.len(), 0);
    }

    #[test]
    fn banned_words_match_whole_words_case_insensitively() {
        let engine = engine(0, 10);
        let mut window = SendWindow::default();
        let actor = Uuid::new_v4();
        let now = Instant::now();

        assert!(matches!(
            engine.block_before_publish(actor, "this is a SCAM!", &mut window, now),
            ModerationVerdict::Block(action) if action.reason() == INAPPROPRIATE_CONTENT_REASON
        ));
        let verdict = engine.block_before_publish(actor, "spammer", &mut window, now);
        assert_eq!(verdict, ModerationVerdict::Allow);
    }

    #[test]
    fn zero_max_disables_rate_limit() {
        let engine = engine(0, 10);
        let mut window = SendWindow::default();
        let actor = Uuid::new_v4();
        let now = Instant::now();
        for _ in 0..100 {
            let verdict = engine.block_before_publish(actor, "hi", &mut window, now);
            assert_eq!(verdict, ModerationVerdict::Allow);
        }
    }

    #[test]
    fn blocks_record_the_acting_session_and_reason() {
        let engine = engine(5, 10);
        let mut window = SendWindow::default();
        let actor = Uuid::new_v4();
        let before = Utc::now();

        let ModerationVerdict::Block(action) =
            engine.block_before_publish(actor, "buy my spam", &mut window, Instant::now())
        else {
            panic!("banned word should block");
        };

        assert_eq!(action.kind, ModerationActionKind::BlockMessage);
        assert_eq!(action.kind.as_str(), "block_message");
        assert_eq!(action.target_message_id, None);
        assert_eq!(action.actor, actor);
        assert_eq!(action.reason.as_deref(), Some(INAPPROPRIATE_CONTENT_REASON));
        assert!(action.timestamp >= before);
    }

    #[test]
    fn delete_actions_name_their_target() {
        let actor = Uuid::new_v4();
        let action = ModerationAction::delete(actor, 7);

        assert_eq!(action.kind, ModerationActionKind::DeleteMessage);
        assert_eq!(action.kind.as_str(), "delete_message");
        assert_eq!(action.target_message_id, Some(7));
        assert_eq!(action.actor, actor);
        assert_eq!(action.reason, None);
        assert_eq!(action.reason(), "");
    }

    #[test]
    fn default_blocklist_includes_bot() {
        let engine = ModerationEngine::default();
        let mut window = SendWindow::default();
        let actor = Uuid::new_v4();
        let verdict =
            engine.block_before_publish(actor, "are you a BOT?", &mut window, Instant::now());
        assert!(matches!(verdict, ModerationVerdict::Block(_)));

        let verdict =
            engine.block_before_publish(actor, "nice robot costume", &mut window, Instant::now());
        assert_eq!(verdict, ModerationVerdict::Allow);
    }

    #[test]
    fn authors_and_moderators_may_delete() {
        let engine = ModerationEngine::default();
        let author_session = Uuid::new_v4();
        let author_user = Uuid::new_v4();
        let target = message(author_session, Some(author_user), MessageKind::User);

        let author = member(Role::Viewer, Some(author_user));
        assert!(engine
            .authorize_delete(Actor { session_id: Uuid::new_v4(), member: &author }, &target)
            .is_ok());

        let moderator = member(Role::Moderator, Some(Uuid::new_v4()));
        assert!(engine
            .authorize_delete(Actor { session_id: Uuid::new_v4(), member: &moderator }, &target)
            .is_ok());

        let broadcaster = member(Role::Broadcaster, Some(Uuid::new_v4()));
        assert!(engine
            .authorize_delete(Actor { session_id: Uuid::new_v4(), member: &broadcaster }, &target)
            .is_ok());
    }

    #[test]
    fn other_viewers_may_not_delete() {
        let engine = ModerationEngine::default();
        let target = message(Uuid::new_v4(), Some(Uuid::new_v4()), MessageKind::User);
        let viewer = member(Role::Viewer, Some(Uuid::new_v4()));

        assert!(matches!(
            engine.authorize_delete(Actor { session_id: Uuid::new_v4(), member: &viewer }, &target),
            Err(ChatError::Authorization(_))
        ));
    }

    #[test]
    fn bot_and_system_messages_are_exempt_from_deletion() {
        let engine = ModerationEngine::default();
        let moderator = member(Role::Moderator, Some(Uuid::new_v4()));
        for kind in [MessageKind::Bot, MessageKind::System] {
            let target = message(Uuid::new_v4(), None, kind);
            assert!(engine
                .authorize_delete(Actor { session_id: Uuid::new_v4(), member: &moderator }, &target)
                .is_err());
        }
    }
}
