//! Namespace Module
//!
//! One independently configured cache region: its entry store, stats and
//! budget behind a single lock, plus handles to its background tasks.
//!
//! The lock is never held across a transform or a fetch. Callers encode or
//! decode payloads unlocked and re-acquire the lock to commit.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::entry::current_timestamp_ms;
use crate::cache::eviction;
use crate::cache::strategy::Outcome;
use crate::cache::tuner::{self, TuneOutcome};
use crate::cache::{
    CacheEntry, EntryStore, NamespaceStats, SetOptions, TransformOptions, Transformer,
};
use crate::config::NamespaceConfig;
use crate::error::{CacheError, Result};

// == Namespace State ==
/// Everything guarded by the namespace lock.
#[derive(Debug)]
struct NamespaceState {
    store: EntryStore,
    /// Counters; `stats.max_size` is the live budget
    stats: NamespaceStats,
    /// Keys with a background refresh in flight
    revalidating: HashSet<String>,
}

impl NamespaceState {
    /// Evict-then-insert: the replaced entry (if any) is dropped first, then
    /// victims are removed until the new entry fits, then it is stored.
    fn insert(&mut self, entry: CacheEntry, namespace: &str) -> usize {
        self.store.remove(&entry.key);

        let incoming = entry.payload.len() as u64;
        let evicted = eviction::make_room(&mut self.store, incoming, self.stats.max_size);
        for _ in &evicted {
            self.stats.record_eviction();
        }

        if incoming > self.stats.max_size {
            warn!(
                namespace,
                key = %entry.key,
                size = incoming,
                budget = self.stats.max_size,
                "Entry larger than namespace budget, storing it alone"
            );
        } else if !evicted.is_empty() {
            debug!(namespace, evicted = evicted.len(), "Evicted entries to fit budget");
        }

        self.store.put(entry);
        evicted.len()
    }

    fn stats(&self) -> NamespaceStats {
        let mut stats = self.stats.clone();
        stats.total_size = self.store.total_size();
        stats.entry_count = self.store.len();
        stats
    }
}

// == Namespace ==
pub struct Namespace {
    config: NamespaceConfig,
    state: RwLock<NamespaceState>,
    transformer: Transformer,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Namespace {
    // == Constructor ==
    pub fn new(config: NamespaceConfig, transformer: Transformer) -> Arc<Self> {
        let state = NamespaceState {
            store: EntryStore::new(),
            stats: NamespaceStats::new(config.max_size),
            revalidating: HashSet::new(),
        };
        Arc::new(Self {
            config,
            state: RwLock::new(state),
            transformer,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::NamespaceNotFound(self.config.name.clone()));
        }
        Ok(())
    }

    fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            compress: self.config.compression,
            encrypt: self.config.encryption,
        }
    }

    fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.config.max_age_ms)
    }

    // == Lookup ==
    /// Returns a copy of the entry for `key` and records the access.
    ///
    /// Expired entries count as absent unless `include_expired` is set.
    pub async fn lookup(&self, key: &str, include_expired: bool) -> Result<Option<CacheEntry>> {
        let mut state = self.state.write().await;
        self.ensure_open()?;

        let now = current_timestamp_ms();
        match state.store.get(key) {
            Some(entry) if include_expired || !entry.is_expired_at(now) => {}
            _ => return Ok(None),
        }
        Ok(state.store.touch(key).cloned())
    }

    // == Decode ==
    /// Turns a stored entry back into a value.
    ///
    /// An entry that cannot be decoded is dropped and reported as absent.
    pub async fn decode<T: DeserializeOwned>(&self, entry: &CacheEntry) -> Option<T> {
        let bytes = match self.transformer.decode(entry.payload.clone()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    namespace = %self.name(),
                    key = %entry.key,
                    "Dropping unreadable entry: {}",
                    e
                );
                self.discard(entry).await;
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    namespace = %self.name(),
                    key = %entry.key,
                    "Dropping undecodable entry: {}",
                    e
                );
                self.discard(entry).await;
                None
            }
        }
    }

    /// Removes `entry` unless it was replaced in the meantime.
    async fn discard(&self, entry: &CacheEntry) {
        let mut state = self.state.write().await;
        let unchanged = state
            .store
            .get(&entry.key)
            .map(|current| current.payload == entry.payload)
            .unwrap_or(false);
        if unchanged {
            state.store.remove(&entry.key);
        }
    }

    // == Store ==
    /// Serializes, transforms and commits a value.
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> Result<()> {
        self.ensure_open()?;

        let bytes = serde_json::to_vec(value)?;
        let payload = self
            .transformer
            .encode(bytes, self.transform_options())
            .await?;
        let ttl = options.ttl.unwrap_or_else(|| self.default_ttl());

        self.commit(CacheEntry::new(key, payload, ttl, options)).await
    }

    // == Commit ==
    /// Inserts an already transformed entry, evicting as needed.
    pub async fn commit(&self, entry: CacheEntry) -> Result<()> {
        let mut state = self.state.write().await;
        self.ensure_open()?;
        state.insert(entry, &self.config.name);
        Ok(())
    }

    // == Record ==
    pub(crate) async fn record(&self, outcome: Outcome, elapsed: Duration) {
        let mut state = self.state.write().await;
        match outcome {
            Outcome::Hit => state.stats.record_hit(),
            Outcome::Miss => state.stats.record_miss(),
        }
        state.stats.record_response_time(elapsed);
    }

    // == Invalidate ==
    /// Removes one entry, or all entries when `key` is `None`.
    pub async fn invalidate(&self, key: Option<&str>) -> Result<usize> {
        let mut state = self.state.write().await;
        self.ensure_open()?;
        let removed = match key {
            Some(key) => state.store.remove(key).map_or(0, |_| 1),
            None => state.store.clear(),
        };
        debug!(namespace = %self.name(), removed, "Invalidated entries");
        Ok(removed)
    }

    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        self.ensure_open()?;
        let removed = state.store.remove_tagged(tag);
        debug!(namespace = %self.name(), tag, removed, "Invalidated tagged entries");
        Ok(removed)
    }

    // == Stats ==
    pub async fn stats(&self) -> NamespaceStats {
        self.state.read().await.stats()
    }

    // == Export ==
    /// Unexpired entries ordered by creation time, then key.
    pub async fn export(&self) -> Result<Vec<CacheEntry>> {
        let state = self.state.read().await;
        self.ensure_open()?;

        let now = current_timestamp_ms();
        let mut entries: Vec<CacheEntry> = state
            .store
            .iter()
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
            .collect();
        entries.sort_by(|a, b| (a.created_at, &a.key).cmp(&(b.created_at, &b.key)));
        Ok(entries)
    }

    // == Import ==
    /// Restores exported entries; expired ones are skipped.
    pub async fn import(&self, entries: Vec<CacheEntry>) -> Result<usize> {
        let mut state = self.state.write().await;
        self.ensure_open()?;

        let now = current_timestamp_ms();
        let mut imported = 0;
        for mut entry in entries {
            if entry.is_expired_at(now) {
                continue;
            }
            entry.size = entry.payload.len() as u64;
            state.insert(entry, &self.config.name);
            imported += 1;
        }
        info!(namespace = %self.name(), imported, "Imported entries");
        Ok(imported)
    }

    // == Sweep ==
    /// Removes expired entries, returning the number removed.
    pub async fn sweep(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        self.ensure_open()?;
        Ok(state.store.remove_expired(current_timestamp_ms()))
    }

    // == Tune ==
    /// Runs one auto-tuning step and applies the new budget.
    pub async fn tune(&self) -> Result<TuneOutcome> {
        let mut state = self.state.write().await;
        self.ensure_open()?;

        let outcome = tuner::next_budget(&state.stats());
        match outcome {
            TuneOutcome::Shrunk { from, to } => {
                state.stats.max_size = to;
                let evicted = eviction::make_room(&mut state.store, 0, to);
                for _ in &evicted {
                    state.stats.record_eviction();
                }
                info!(
                    namespace = %self.name(),
                    from,
                    to,
                    evicted = evicted.len(),
                    "Shrunk namespace budget"
                );
            }
            TuneOutcome::Grown { from, to } => {
                state.stats.max_size = to;
                info!(namespace = %self.name(), from, to, "Grew namespace budget");
            }
            TuneOutcome::Unchanged { .. } => {}
        }
        Ok(outcome)
    }

    // == Revalidation Tracking ==
    /// Marks a background refresh of `key` as in flight.
    ///
    /// Returns false if one is already running.
    pub async fn begin_revalidation(&self, key: &str) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state.write().await.revalidating.insert(key.to_string())
    }

    pub async fn end_revalidation(&self, key: &str) {
        self.state.write().await.revalidating.remove(key);
    }

    // == Lifecycle ==
    pub(crate) async fn attach_tasks(&self, handles: impl IntoIterator<Item = JoinHandle<()>>) {
        self.tasks.lock().await.extend(handles);
    }

    /// Cancels background tasks and drops all entries.
    ///
    /// Any later operation on this namespace fails.
    pub(crate) async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }

        let mut state = self.state.write().await;
        let dropped = state.store.clear();
        state.revalidating.clear();
        info!(namespace = %self.name(), dropped, "Namespace torn down");
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Codec, Priority};

    fn namespace(max_size: u64) -> Arc<Namespace> {
        let (transformer, _handle) = Transformer::spawn(Codec::new(None, 3, 64));
        Namespace::new(
            NamespaceConfig::new("test").with_max_size(max_size),
            transformer,
        )
    }

    #[tokio::test]
    async fn test_store_and_lookup() {
        let ns = namespace(1024);
        ns.store("k", "hello", &SetOptions::new()).await.unwrap();

        let entry = ns.lookup("k", false).await.unwrap().unwrap();
        assert_eq!(entry.access_count, 1);
        let value: String = ns.decode(&entry).await.unwrap();
        assert_eq!(value, "hello");
    }

    #[tokio::test]
    async fn test_lookup_hides_expired_unless_asked() {
        let ns = namespace(1024);
        ns.store("k", &1u32, &SetOptions::new().ttl(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(ns.lookup("k", false).await.unwrap().is_none());
        assert!(ns.lookup("k", true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_budget_enforced_on_commit() {
        // "xxxxxxxx" serializes to 10 bytes of JSON
        let ns = namespace(25);
        ns.store("a", "xxxxxxxx", &SetOptions::new()).await.unwrap();
        ns.store("b", "xxxxxxxx", &SetOptions::new()).await.unwrap();
        ns.store("c", "xxxxxxxx", &SetOptions::new()).await.unwrap();

        let stats = ns.stats().await;
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.total_size, 20);
        assert_eq!(stats.evictions, 1);
        assert!(ns.lookup("a", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_is_not_an_eviction() {
        let ns = namespace(15);
        ns.store("a", "xxxxxxxx", &SetOptions::new()).await.unwrap();
        ns.store("a", "yyyyyyyy", &SetOptions::new()).await.unwrap();

        let stats = ns.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test]
    async fn test_oversized_entry_stored_alone() {
        let ns = namespace(20);
        ns.store("small", "x", &SetOptions::new().priority(Priority::Critical))
            .await
            .unwrap();
        ns.store("huge", &"z".repeat(100), &SetOptions::new())
            .await
            .unwrap();

        let stats = ns.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert!(stats.total_size > stats.max_size);
        assert!(ns.lookup("huge", false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_undecodable_entry_dropped() {
        let ns = namespace(1024);
        ns.store("k", "not a number", &SetOptions::new())
            .await
            .unwrap();

        let entry = ns.lookup("k", false).await.unwrap().unwrap();
        assert!(ns.decode::<u64>(&entry).await.is_none());
        assert!(ns.lookup("k", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revalidation_deduplicated() {
        let ns = namespace(1024);
        assert!(ns.begin_revalidation("k").await);
        assert!(!ns.begin_revalidation("k").await);
        ns.end_revalidation("k").await;
        assert!(ns.begin_revalidation("k").await);
    }

    #[tokio::test]
    async fn test_shutdown_fails_later_operations() {
        let ns = namespace(1024);
        ns.store("k", "v", &SetOptions::new()).await.unwrap();
        ns.shutdown().await;

        assert!(ns.is_closed());
        assert!(matches!(
            ns.lookup("k", false).await,
            Err(CacheError::NamespaceNotFound(_))
        ));
        assert!(ns.store("k", "v", &SetOptions::new()).await.is_err());
        assert_eq!(ns.stats().await.entry_count, 0);
    }
}
