//! Cache Module
//!
//! Namespaced in-memory caching with fetch strategies, priority/LRU eviction
//! under a byte budget, payload transforms, expiry and budget auto-tuning.

mod entry;
mod eviction;
mod namespace;
mod snapshot;
mod stats;
mod store;
mod strategy;
mod transform;
mod tuner;


// Re-export public types
pub use entry::{current_timestamp_ms, duration_ms, CacheEntry, Priority, SetOptions};
pub use eviction::{make_room, select_victims};
pub use namespace::Namespace;
pub use snapshot::NamespaceSnapshot;
pub use stats::NamespaceStats;
pub use store::EntryStore;
pub use strategy::FetchStrategy;
pub use transform::{Codec, StoredPayload, TransformError, TransformOptions, Transformer};
pub use tuner::{next_budget, TuneOutcome, MIN_BUDGET};

pub(crate) use strategy::execute;

use crate::error::{CacheError, Result};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

// == Key Validation ==
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
