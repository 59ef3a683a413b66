// Automated chat participants.

use livechat_common::protocol::chat::ChatMessageView;

/// Replies to published user messages.
///
/// Called after the triggering message has been delivered and outside any
/// room lock. Replies are published as bot messages, which skip validation
/// and moderation.
pub trait ChatBot: Send + Sync {
    fn name(&self) -> &str;

    fn respond(&self, message: &ChatMessageView) -> Option<String>;
}

/// The default: nobody answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBot;

impl ChatBot for NoBot {
    fn name(&self) -> &str {
        "none"
    }

    fn respond(&self, _message: &ChatMessageView) -> Option<String> {
        None
    }
}

/// Answers a fixed set of `!commands`.
#[derive(Debug, Clone)]
pub struct CommandBot {
    name: String,
}

impl CommandBot {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ChatBot for CommandBot {
    fn name(&self) -> &str {
        &self.name
    }

    fn respond(&self, message: &ChatMessageView) -> Option<String> {
        if message.is_bot || message.is_system {
            return None;
        }

        let command = message.message.split_whitespace().next()?.to_ascii_lowercase();
        match command.as_str() {
            "!help" => Some("Available commands: !help, !rules".to_string()),
            "!rules" => Some(
                "Be kind, no spam, no scams. Messages are limited to 500 characters.".to_string(),
            ),
            _ => None,
        }
    }
}
