//! Snapshot Module
//!
//! Versioned bulk export of a namespace, handed to an external store for
//! persistence and restored with `CacheEngine::import_snapshot`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    /// Namespace the entries were exported from
    pub namespace: String,
    /// Namespace version tag at export time
    pub version: String,
    pub exported_at: DateTime<Utc>,
    /// Entries ordered by creation time
    pub entries: Vec<CacheEntry>,
}

impl NamespaceSnapshot {
    pub fn new(
        namespace: impl Into<String>,
        version: impl Into<String>,
        entries: Vec<CacheEntry>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            version: version.into(),
            exported_at: Utc::now(),
            entries,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Bytes of stored payload carried by the snapshot.
    pub fn payload_size(&self) -> u64 {
        self.entries.iter().map(|e| e.payload.len() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{SetOptions, StoredPayload};
    use std::time::Duration;

    #[test]
    fn test_snapshot_json_roundtrip() {
        let entry = CacheEntry::new(
            "k",
            StoredPayload::plain(b"\"v\"".to_vec()),
            Duration::from_secs(60),
            &SetOptions::new().tag("t"),
        );
        let snapshot = NamespaceSnapshot::new("ns", "2", vec![entry]);

        let json = snapshot.to_json().unwrap();
        let restored = NamespaceSnapshot::from_json(&json).unwrap();
        assert_eq!(restored, snapshot);
        assert_eq!(restored.payload_size(), 3);
    }
}
