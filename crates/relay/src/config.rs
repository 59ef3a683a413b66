// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use crate::{
    chat::{
        bot::{ChatBot, CommandBot, NoBot},
        bus::DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        gateway::{ChatGateway, GatewaySettings},
        history::DEFAULT_HISTORY_CAPACITY,
        moderation::{
            ModerationEngine, ModerationPolicy, DEFAULT_BANNED_WORDS,
            DEFAULT_RATE_LIMIT_MAX_MESSAGES, DEFAULT_RATE_LIMIT_WINDOW,
        },
        registry::{RoomRegistry, DEFAULT_RETIRE_GRACE},
        room::RoomSettings,
    },
    streams::{LiveStreams, MemoryStreamDirectory},
};
use livechat_common::validation::MAX_MESSAGE_CHARS;
use uuid::Uuid;

const DEV_JWT_SECRET: &str = "livechat_local_development_jwt_secret_must_be_32_chars";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret for viewer tokens.
    pub jwt_secret: String,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `livechat_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    pub history_capacity: usize,
    pub max_message_chars: usize,
    pub rate_limit_max_messages: usize,
    pub rate_limit_window: Duration,
    pub outbound_queue_capacity: usize,
    pub room_retire_grace: Duration,
    pub live_streams: LiveStreams,
    pub stream_owners: Vec<(String, Uuid)>,
    pub banned_words: Vec<String>,
    pub announce_joins: bool,
    /// Name of the command bot. `None` runs without a bot.
    pub bot_name: Option<String>,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LIVECHAT_RELAY_HOST` | `0.0.0.0` |
    /// | `LIVECHAT_RELAY_PORT` | `8080` |
    /// | `LIVECHAT_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `LIVECHAT_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `LIVECHAT_RELAY_LOG_FILTER` | `info` |
    /// | `LIVECHAT_RELAY_LOG_FORMAT` | `text` |
    /// | `LIVECHAT_RELAY_HISTORY_CAPACITY` | `100` |
    /// | `LIVECHAT_RELAY_MAX_MESSAGE_CHARS` | `500` |
    /// | `LIVECHAT_RELAY_RATE_LIMIT_MAX_MESSAGES` | `5` |
    /// | `LIVECHAT_RELAY_RATE_LIMIT_WINDOW_SECS` | `10` |
    /// | `LIVECHAT_RELAY_OUTBOUND_QUEUE_CAPACITY` | `256` |
    /// | `LIVECHAT_RELAY_ROOM_RETIRE_GRACE_MS` | `5000` |
    /// | `LIVECHAT_RELAY_LIVE_STREAMS` | `*` |
    /// | `LIVECHAT_RELAY_STREAM_OWNERS` | *(none)* |
    /// | `LIVECHAT_RELAY_BANNED_WORDS` | `spam,scam,fake,bot,hack,cheat` |
    /// | `LIVECHAT_RELAY_ANNOUNCE_JOINS` | `false` |
    /// | `LIVECHAT_RELAY_BOT_NAME` | *(none)* |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let parsed = |key: &str| env(key).ok().and_then(|v| v.trim().parse::<u64>().ok());

        let host = env("LIVECHAT_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("LIVECHAT_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("LIVECHAT_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let cors_origins = env("LIVECHAT_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("LIVECHAT_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("LIVECHAT_RELAY_LOG_FORMAT").ok().as_deref().map(str::trim) {
            Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let history_capacity = parsed("LIVECHAT_RELAY_HISTORY_CAPACITY")
            .filter(|value| *value > 0)
            .map_or(DEFAULT_HISTORY_CAPACITY, |value| value as usize);
        let max_message_chars = parsed("LIVECHAT_RELAY_MAX_MESSAGE_CHARS")
            .filter(|value| *value > 0)
            .map_or(MAX_MESSAGE_CHARS, |value| value as usize);
        let rate_limit_max_messages = parsed("LIVECHAT_RELAY_RATE_LIMIT_MAX_MESSAGES")
            .map_or(DEFAULT_RATE_LIMIT_MAX_MESSAGES, |value| value as usize);
        let rate_limit_window = parsed("LIVECHAT_RELAY_RATE_LIMIT_WINDOW_SECS")
            .filter(|value| *value > 0)
            .map_or(DEFAULT_RATE_LIMIT_WINDOW, Duration::from_secs);
        let outbound_queue_capacity = parsed("LIVECHAT_RELAY_OUTBOUND_QUEUE_CAPACITY")
            .filter(|value| *value > 0)
            .map_or(DEFAULT_OUTBOUND_QUEUE_CAPACITY, |value| value as usize);
        let room_retire_grace = parsed("LIVECHAT_RELAY_ROOM_RETIRE_GRACE_MS")
            .map_or(DEFAULT_RETIRE_GRACE, Duration::from_millis);

        let live_streams = env("LIVECHAT_RELAY_LIVE_STREAMS")
            .map(|raw| MemoryStreamDirectory::parse_live_streams(&raw))
            .unwrap_or(LiveStreams::All);
        let mut stream_owners: Vec<(String, Uuid)> = env("LIVECHAT_RELAY_STREAM_OWNERS")
            .map(|raw| MemoryStreamDirectory::parse_owners(&raw).into_iter().collect())
            .unwrap_or_default();
        stream_owners.sort();

        let banned_words = match env("LIVECHAT_RELAY_BANNED_WORDS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|word| !word.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
            Err(_) => DEFAULT_BANNED_WORDS.iter().map(|word| word.to_string()).collect(),
        };

        let announce_joins = env("LIVECHAT_RELAY_ANNOUNCE_JOINS")
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let bot_name = env("LIVECHAT_RELAY_BOT_NAME")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Self {
            listen_addr,
            jwt_secret,
            cors_origins,
            log_filter,
            log_format,
            history_capacity,
            max_message_chars,
            rate_limit_max_messages,
            rate_limit_window,
            outbound_queue_capacity,
            room_retire_grace,
            live_streams,
            stream_owners,
            banned_words,
            announce_joins,
            bot_name,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn moderation_policy(&self) -> ModerationPolicy {
        ModerationPolicy {
            rate_limit_max_messages: self.rate_limit_max_messages,
            rate_limit_window: self.rate_limit_window,
            banned_words: self.banned_words.clone(),
        }
    }

    pub fn stream_directory(&self) -> MemoryStreamDirectory {
        MemoryStreamDirectory::from_parts(
            self.live_streams.clone(),
            self.stream_owners.iter().cloned().collect(),
        )
    }

    pub fn build_gateway(&self) -> ChatGateway {
        let registry = RoomRegistry::new(
            RoomSettings {
                history_capacity: self.history_capacity,
                queue_capacity: self.outbound_queue_capacity,
            },
            self.room_retire_grace,
        );
        let bot: Arc<dyn ChatBot> = match &self.bot_name {
            Some(name) => Arc::new(CommandBot::new(name.clone())),
            None => Arc::new(NoBot),
        };

        ChatGateway::new(
            Arc::new(registry),
            Arc::new(self.stream_directory()),
            ModerationEngine::new(self.moderation_policy()),
            bot,
            GatewaySettings {
                max_message_chars: self.max_message_chars,
                announce_joins: self.announce_joins,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::StreamDirectory;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, String>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).cloned().ok_or(std::env::VarError::NotPresent)
    }

    fn config_with(pairs: &[(&'static str, &str)]) -> RelayConfig {
        let map = pairs.iter().map(|(key, value)| (*key, value.to_string())).collect();
        RelayConfig::from_env_fn(env_from_map(map))
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = config_with(&[]);
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.is_dev_jwt_secret());
        assert!(cfg.cors_origins.is_none());
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(cfg.history_capacity, 100);
        assert_eq!(cfg.max_message_chars, 500);
        assert_eq!(cfg.rate_limit_max_messages, 5);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(10));
        assert_eq!(cfg.outbound_queue_capacity, 256);
        assert_eq!(cfg.room_retire_grace, Duration::from_millis(5000));
        assert_eq!(cfg.live_streams, LiveStreams::All);
        assert!(cfg.stream_owners.is_empty());
        assert_eq!(cfg.banned_words, vec!["spam", "scam", "fake", "bot", "hack", "cheat"]);
        assert!(!cfg.announce_joins);
        assert!(cfg.bot_name.is_none());
    }

    #[test]
    fn custom_host_and_port() {
        let cfg =
            config_with(&[("LIVECHAT_RELAY_HOST", "127.0.0.1"), ("LIVECHAT_RELAY_PORT", "3000")]);
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let secret = "production_secret_at_least_32_chars!!";
        let cfg = config_with(&[("LIVECHAT_RELAY_JWT_SECRET", secret)]);
        assert!(!cfg.is_dev_jwt_secret());
        assert_eq!(cfg.jwt_secret, "production_secret_at_least_32_chars!!");
    }

    #[test]
    fn invalid_numbers_use_defaults() {
        let cfg = config_with(&[
            ("LIVECHAT_RELAY_PORT", "not_a_number"),
            ("LIVECHAT_RELAY_HISTORY_CAPACITY", "0"),
            ("LIVECHAT_RELAY_RATE_LIMIT_WINDOW_SECS", "-3"),
            ("LIVECHAT_RELAY_OUTBOUND_QUEUE_CAPACITY", "lots"),
        ]);
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.history_capacity, 100);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(10));
        assert_eq!(cfg.outbound_queue_capacity, 256);
    }

    #[test]
    fn chat_limits_from_env() {
        let cfg = config_with(&[
            ("LIVECHAT_RELAY_HISTORY_CAPACITY", "20"),
            ("LIVECHAT_RELAY_MAX_MESSAGE_CHARS", "140"),
            ("LIVECHAT_RELAY_RATE_LIMIT_MAX_MESSAGES", "0"),
            ("LIVECHAT_RELAY_RATE_LIMIT_WINDOW_SECS", "30"),
            ("LIVECHAT_RELAY_ROOM_RETIRE_GRACE_MS", "0"),
        ]);
        assert_eq!(cfg.history_capacity, 20);
        assert_eq!(cfg.max_message_chars, 140);
        assert_eq!(cfg.rate_limit_max_messages, 0);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(30));
        assert_eq!(cfg.room_retire_grace, Duration::ZERO);
    }

    #[test]
    fn logging_options_from_env() {
        let cfg = config_with(&[
            ("LIVECHAT_RELAY_LOG_FILTER", "debug,tower_http=trace"),
            ("LIVECHAT_RELAY_LOG_FORMAT", "JSON"),
        ]);
        assert_eq!(cfg.log_filter, "debug,tower_http=trace");
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn stream_directory_from_env() {
        let owner = Uuid::new_v4();
        let owners = format!("42={owner}");
        let cfg = config_with(&[
            ("LIVECHAT_RELAY_LIVE_STREAMS", "42,43"),
            ("LIVECHAT_RELAY_STREAM_OWNERS", &owners),
        ]);
        let directory = cfg.stream_directory();
        assert!(directory.is_stream_live("42"));
        assert!(!directory.is_stream_live("44"));
        assert_eq!(directory.broadcaster_of("42"), Some(owner));
    }

    #[test]
    fn banned_words_bot_and_announcements_from_env() {
        let cfg = config_with(&[
            ("LIVECHAT_RELAY_BANNED_WORDS", " foo , ,Bar"),
            ("LIVECHAT_RELAY_ANNOUNCE_JOINS", "true"),
            ("LIVECHAT_RELAY_BOT_NAME", " HelperBot "),
        ]);
        assert_eq!(cfg.banned_words, vec!["foo", "Bar"]);
        assert!(cfg.announce_joins);
        assert_eq!(cfg.bot_name.as_deref(), Some("HelperBot"));

        let gateway_policy = cfg.moderation_policy();
        assert_eq!(gateway_policy.banned_words, vec!["foo", "Bar"]);
    }

    #[test]
    fn empty_banned_words_disables_blocklist() {
        let cfg = config_with(&[("LIVECHAT_RELAY_BANNED_WORDS", "")]);
        assert!(cfg.banned_words.is_empty());
    }

    #[tokio::test]
    async fn built_gateway_uses_configured_capacities() {
        let cfg = config_with(&[("LIVECHAT_RELAY_HISTORY_CAPACITY", "7")]);
        let gateway = cfg.build_gateway();
        assert_eq!(gateway.registry().settings().history_capacity, 7);
    }
}
