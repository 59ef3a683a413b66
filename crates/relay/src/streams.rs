// Stream liveness and ownership lookups.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

/// The streaming side of the platform, as far as chat cares.
pub trait StreamDirectory: Send + Sync {
    /// Whether chat for `room_id` may be joined right now.
    fn is_stream_live(&self, room_id: &str) -> bool;

    /// The user who owns the stream, if known.
    fn broadcaster_of(&self, room_id: &str) -> Option<Uuid>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStreams {
    All,
    Only(HashSet<String>),
}

/// Fixed directory built from configuration.
#[derive(Debug, Clone)]
pub struct MemoryStreamDirectory {
    live: LiveStreams,
    owners: HashMap<String, Uuid>,
}

impl Default for MemoryStreamDirectory {
    fn default() -> Self {
        Self::all_live()
    }
}

impl MemoryStreamDirectory {
    pub fn all_live() -> Self {
        Self { live: LiveStreams::All, owners: HashMap::new() }
    }

    pub fn only<I, S>(room_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            live: LiveStreams::Only(room_ids.into_iter().map(Into::into).collect()),
            owners: HashMap::new(),
        }
    }

    pub fn with_owner(mut self, room_id: impl Into<String>, owner: Uuid) -> Self {
        self.owners.insert(room_id.into(), owner);
        self
    }

    /// Parse `*` or a comma-separated list of stream ids.
    pub fn parse_live_streams(raw: &str) -> LiveStreams {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return LiveStreams::All;
        }

        LiveStreams::Only(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
        )
    }

    /// Parse `stream_id=uuid` pairs separated by commas. Malformed pairs
    /// are skipped.
    pub fn parse_owners(raw: &str) -> HashMap<String, Uuid> {
        raw.split(',')
            .filter_map(|pair| {
                let (room_id, owner) = pair.split_once('=')?;
                let room_id = room_id.trim();
                if room_id.is_empty() {
                    return None;
                }
                let owner = Uuid::parse_str(owner.trim()).ok()?;
                Some((room_id.to_string(), owner))
            })
            .collect()
    }

    pub fn from_parts(live: LiveStreams, owners: HashMap<String, Uuid>) -> Self {
        Self { live, owners }
    }
}

impl StreamDirectory for MemoryStreamDirectory {
    fn is_stream_live(&self, room_id: &str) -> bool {
        match &self.live {
            LiveStreams::All => true,
            LiveStreams::Only(ids) => ids.contains(room_id),
        }
    }

    fn broadcaster_of(&self, room_id: &str) -> Option<Uuid> {
        self.owners.get(room_id).copied()
    }
}
