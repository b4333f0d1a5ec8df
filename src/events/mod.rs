//! # Cache events
//!
//! Four observable moments around repository operations: a hit, a miss, a
//! write and a delete. Events are a side channel: they fire after the
//! operation has completed and nothing a listener does can change the
//! operation's result.

pub mod dispatcher;

pub use dispatcher::{CacheListener, EventDispatcher, ListenerError};

use std::time::Duration;

/// Event names, for listeners that route on strings
pub mod names {
    pub const HIT: &str = "cache.hit";
    pub const MISSED: &str = "cache.missed";
    pub const WRITTEN: &str = "cache.written";
    pub const DELETED: &str = "cache.deleted";
}

/// An observable cache moment
///
/// `key` is always the caller's key, never a tag-namespaced one; `tags` lists
/// the tag set the operation ran under (empty for untagged operations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Hit {
        key: String,
        value: Vec<u8>,
        tags: Vec<String>,
    },
    Missed {
        key: String,
        tags: Vec<String>,
    },
    Written {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
        tags: Vec<String>,
    },
    Deleted {
        key: String,
        tags: Vec<String>,
    },
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hit { .. } => names::HIT,
            Self::Missed { .. } => names::MISSED,
            Self::Written { .. } => names::WRITTEN,
            Self::Deleted { .. } => names::DELETED,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Hit { key, .. }
            | Self::Missed { key, .. }
            | Self::Written { key, .. }
            | Self::Deleted { key, .. } => key,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Self::Hit { tags, .. }
            | Self::Missed { tags, .. }
            | Self::Written { tags, .. }
            | Self::Deleted { tags, .. } => tags,
        }
    }
}
