// Core domain types shared by the relay and chat clients.

use serde::{Deserialize, Serialize};

/// Role of a participant within a stream's chat room.
///
/// Ordered from most to least privileged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Broadcaster,
    Moderator,
    Viewer,
    Anonymous,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Broadcaster => "broadcaster",
            Self::Moderator => "moderator",
            Self::Viewer => "viewer",
            Self::Anonymous => "anonymous",
        }
    }

    /// Parse a role claim. Unknown values yield `None`.
    pub fn from_claim(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "broadcaster" => Some(Self::Broadcaster),
            "moderator" => Some(Self::Moderator),
            "viewer" => Some(Self::Viewer),
            "anonymous" => Some(Self::Anonymous),
            _ => None,
        }
    }

    /// Broadcasters and moderators may act on messages they did not author.
    pub const fn can_moderate(self) -> bool {
        matches!(self, Self::Broadcaster | Self::Moderator)
    }
}

/// Visibility of a message that has been assigned a sequence id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Visible,
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_claims_round_trip_through_as_str() {
        for role in [Role::Broadcaster, Role::Moderator, Role::Viewer, Role::Anonymous] {
            assert_eq!(Role::from_claim(role.as_str()), Some(role));
        }
    }

    #[test]
    fn role_claim_parsing_is_case_insensitive() {
        assert_eq!(Role::from_claim(" Moderator "), Some(Role::Moderator));
        assert_eq!(Role::from_claim("admin"), None);
    }

    #[test]
    fn only_broadcaster_and_moderator_can_moderate() {
        assert!(Role::Broadcaster.can_moderate());
        assert!(Role::Moderator.can_moderate());
        assert!(!Role::Viewer.can_moderate());
        assert!(!Role::Anonymous.can_moderate());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(MessageStatus::Deleted).unwrap(), "deleted");
        assert_eq!(MessageStatus::default(), MessageStatus::Visible);
    }
}
