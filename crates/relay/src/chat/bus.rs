// Per-room fan-out to subscribed sessions.

use std::collections::HashMap;

use livechat_common::{protocol::chat::ServerEvent, validation::validate_message_body_with_limit};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::session::SessionId;
use crate::error::ChatError;

pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Delivers room events to every subscriber's bounded outbound queue.
///
/// All methods run under the owning room's lock, so every subscriber
/// observes events in the same order. A subscriber whose queue is full is
/// dropped rather than allowed to stall the room.
#[derive(Debug)]
pub struct MessageBus {
    queue_capacity: usize,
    subscribers: HashMap<SessionId, mpsc::Sender<ServerEvent>>,
    last_sequence: u64,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_QUEUE_CAPACITY)
    }
}

impl MessageBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            subscribers: HashMap::new(),
            last_sequence: 0,
        }
    }

    /// Register a fresh outbound queue, replacing any previous one.
    pub fn subscribe(&mut self, session_id: SessionId) -> mpsc::Receiver<ServerEvent> {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.subscribers.insert(session_id, sender);
        receiver
    }

    pub fn unsubscribe(&mut self, session_id: SessionId) -> bool {
        self.subscribers.remove(&session_id).is_some()
    }

    pub fn is_subscribed(&self, session_id: SessionId) -> bool {
        self.subscribers.contains_key(&session_id)
    }

    /// Next sequence id. Strictly increasing, starting at 1.
    pub fn next_sequence(&mut self) -> u64 {
        self.last_sequence += 1;
        self.last_sequence
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Offer `event` to every subscriber without waiting.
    ///
    /// Returns the sessions that were dropped because their queue was full
    /// or their receiver had gone away.
    pub fn fan_out(&mut self, event: &ServerEvent) -> Vec<SessionId> {
        let mut dropped = Vec::new();
        for (session_id, sender) in &self.subscribers {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                    dropped.push(*session_id);
                }
            }
        }

        for session_id in &dropped {
            self.subscribers.remove(session_id);
        }

        dropped
    }
}

/// Body check that runs before moderation and publication.
///
/// Returns the trimmed body that will be stored and broadcast.
pub fn validate_body(body: &str, max_chars: usize) -> Result<String, ChatError> {
    validate_message_body_with_limit(body, max_chars).map_err(ChatError::from)
}
