//! Eviction Controller Module
//!
//! Picks victims when a namespace would exceed its byte budget.
//!
//! Candidates are ordered by priority tier first (`Low` before `Critical`),
//! then by least recent access within a tier.

use crate::cache::{CacheEntry, EntryStore};

// == Select Victims ==
/// Returns the keys to remove, in eviction order, to free at least `over_by` bytes.
///
/// If the whole set is not enough, every key is returned.
pub fn select_victims<'a>(
    entries: impl Iterator<Item = &'a CacheEntry>,
    over_by: u64,
) -> Vec<String> {
    if over_by == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<&CacheEntry> = entries.collect();
    candidates.sort_by_key(|e| (e.priority, e.last_accessed, e.access_seq));

    let mut freed = 0u64;
    let mut victims = Vec::new();
    for entry in candidates {
        if freed >= over_by {
            break;
        }
        freed += entry.size;
        victims.push(entry.key.clone());
    }
    victims
}

// == Make Room ==
/// Evicts entries until `incoming` more bytes fit under `max_size`.
///
/// Returns the evicted entries.
pub fn make_room(store: &mut EntryStore, incoming: u64, max_size: u64) -> Vec<CacheEntry> {
    let over_by = (store.total_size() + incoming).saturating_sub(max_size);
    select_victims(store.iter(), over_by)
        .into_iter()
        .filter_map(|key| store.remove(&key))
        .collect()
}
