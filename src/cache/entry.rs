//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL, priority and tags.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::StoredPayload;

// == Priority ==
/// Coarse importance tier, the primary eviction sort key.
///
/// Ordering is `Low < Medium < High < Critical`; lower tiers are evicted first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

// == Set Options ==
/// Per-write options for `CacheEngine::set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the namespace default TTL
    pub ttl: Option<Duration>,
    /// Eviction tier
    pub priority: Priority,
    /// Tags used for bulk invalidation
    pub tags: HashSet<String>,
    /// Free-form metadata carried with the entry
    pub metadata: HashMap<String, String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<&CacheEntry> for SetOptions {
    /// Options that rewrite an entry with the namespace default TTL.
    fn from(entry: &CacheEntry) -> Self {
        Self {
            ttl: None,
            priority: entry.priority,
            tags: entry.tags.clone(),
            metadata: entry.metadata.clone(),
        }
    }
}

// == Cache Entry ==
/// Represents a single cache entry with its stored payload and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key, unique within the namespace
    pub key: String,
    /// Post-transform payload
    pub payload: StoredPayload,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
    /// Size of the stored payload in bytes
    pub size: u64,
    /// Number of read hits
    pub access_count: u64,
    /// Last read or write (Unix milliseconds)
    pub last_accessed: u64,
    pub priority: Priority,
    pub tags: HashSet<String>,
    pub metadata: HashMap<String, String>,
    /// Namespace-local access sequence, breaks `last_accessed` ties
    #[serde(default)]
    pub access_seq: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry expiring `ttl` after now.
    pub fn new(
        key: impl Into<String>,
        payload: StoredPayload,
        ttl: Duration,
        options: &SetOptions,
    ) -> Self {
        let now = current_timestamp_ms();
        Self {
            key: key.into(),
            size: payload.len() as u64,
            payload,
            created_at: now,
            expires_at: now.saturating_add(duration_ms(ttl)),
            access_count: 0,
            last_accessed: now,
            priority: options.priority,
            tags: options.tags.clone(),
            metadata: options.metadata.clone(),
            access_seq: 0,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Checks expiry against a caller-supplied clock reading.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at.saturating_sub(current_timestamp_ms())
    }

    // == Touch ==
    /// Records a read hit.
    pub fn touch(&mut self, seq: u64) {
        self.access_count += 1;
        self.last_accessed = current_timestamp_ms();
        self.access_seq = seq;
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or(0)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
