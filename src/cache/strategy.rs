//! Strategy Executor Module
//!
//! The five fetch strategies, each combining an entry store read with an
//! optional caller-supplied fetch function.
//!
//! Every call counts as one request. A value served from the store without
//! awaiting the fetch function is a hit; anything else is a miss. Fetch
//! functions run without the namespace lock and are never retried.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{Namespace, SetOptions};
use crate::error::{CacheError, Result};

// == Fetch Strategy ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Serve fresh entries, fetch and store on a miss
    #[default]
    CacheFirst,
    /// Always fetch, fall back to any cached entry when the fetch fails
    NetworkFirst,
    /// Serve fresh entries immediately and refresh them in the background
    StaleWhileRevalidate,
    /// Always fetch, never touch the store
    NetworkOnly,
    /// Never fetch
    CacheOnly,
}

impl FetchStrategy {
    pub const ALL: [FetchStrategy; 5] = [
        FetchStrategy::CacheFirst,
        FetchStrategy::NetworkFirst,
        FetchStrategy::StaleWhileRevalidate,
        FetchStrategy::NetworkOnly,
        FetchStrategy::CacheOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStrategy::CacheFirst => "cache-first",
            FetchStrategy::NetworkFirst => "network-first",
            FetchStrategy::StaleWhileRevalidate => "stale-while-revalidate",
            FetchStrategy::NetworkOnly => "network-only",
            FetchStrategy::CacheOnly => "cache-only",
        }
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        FetchStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| CacheError::InvalidRequest(format!("Unknown fetch strategy: {}", s)))
    }
}

/// How a request was served, for hit/miss accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Hit,
    Miss,
}

// == Execute ==
/// Runs one `get` through the namespace's strategy and records its stats.
pub(crate) async fn execute<T, F, Fut>(
    ns: &Arc<Namespace>,
    key: &str,
    fetch: Option<F>,
) -> Result<Option<T>>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let started = Instant::now();

    let (result, outcome) = match ns.config().strategy {
        FetchStrategy::CacheFirst => cache_first(ns, key, fetch).await,
        FetchStrategy::NetworkFirst => network_first(ns, key, fetch).await,
        FetchStrategy::StaleWhileRevalidate => stale_while_revalidate(ns, key, fetch).await,
        FetchStrategy::NetworkOnly => network_only(fetch).await,
        FetchStrategy::CacheOnly => cache_only(ns, key).await,
    };

    // A namespace torn down mid-request reports the error without stats
    if !matches!(result, Err(ref e) if e.is_configuration_error()) {
        ns.record(outcome, started.elapsed()).await;
    }
    debug!(namespace = %ns.name(), key, ?outcome, "Executed {}", ns.config().strategy);

    result
}

type Served<T> = (Result<Option<T>>, Outcome);

async fn cache_first<T, F, Fut>(ns: &Arc<Namespace>, key: &str, fetch: Option<F>) -> Served<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match read(ns, key, false).await {
        Ok(Some(value)) => return (Ok(Some(value)), Outcome::Hit),
        Ok(None) => {}
        Err(e) => return (Err(e), Outcome::Miss),
    }

    let Some(fetch) = fetch else {
        return (Ok(None), Outcome::Miss);
    };
    let result = fetch_and_store(ns, key, fetch, &SetOptions::default()).await;
    (result.map(Some), Outcome::Miss)
}

async fn network_first<T, F, Fut>(ns: &Arc<Namespace>, key: &str, fetch: Option<F>) -> Served<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let Some(fetch) = fetch else {
        return read_only(ns, key).await;
    };

    match fetch().await {
        Ok(value) => {
            store_fetched(ns, key, &value, &SetOptions::default()).await;
            (Ok(Some(value)), Outcome::Miss)
        }
        Err(err) => (fall_back_to_cached(ns, key, err).await, Outcome::Miss),
    }
}

async fn stale_while_revalidate<T, F, Fut>(
    ns: &Arc<Namespace>,
    key: &str,
    fetch: Option<F>,
) -> Served<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let cached = match ns.lookup(key, false).await {
        Ok(cached) => cached,
        Err(e) => return (Err(e), Outcome::Miss),
    };

    if let Some(entry) = cached {
        if let Some(value) = ns.decode::<T>(&entry).await {
            if let Some(fetch) = fetch {
                if ns.begin_revalidation(key).await {
                    let options = SetOptions::from(&entry);
                    spawn_revalidation(Arc::clone(ns), key.to_string(), fetch, options);
                } else {
                    debug!(namespace = %ns.name(), key, "Revalidation already in flight");
                }
            }
            return (Ok(Some(value)), Outcome::Hit);
        }
    }

    let Some(fetch) = fetch else {
        return (Ok(None), Outcome::Miss);
    };

    match fetch().await {
        Ok(value) => {
            store_fetched(ns, key, &value, &SetOptions::default()).await;
            (Ok(Some(value)), Outcome::Miss)
        }
        Err(err) => (fall_back_to_cached(ns, key, err).await, Outcome::Miss),
    }
}

async fn network_only<T, F, Fut>(fetch: Option<F>) -> Served<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let Some(fetch) = fetch else {
        return (Ok(None), Outcome::Miss);
    };
    let result = fetch().await.map(Some).map_err(CacheError::fetch);
    (result, Outcome::Miss)
}

async fn cache_only<T: DeserializeOwned>(ns: &Arc<Namespace>, key: &str) -> Served<T> {
    read_only(ns, key).await
}

// == Helpers ==
async fn read<T: DeserializeOwned>(
    ns: &Namespace,
    key: &str,
    include_expired: bool,
) -> Result<Option<T>> {
    match ns.lookup(key, include_expired).await? {
        Some(entry) => Ok(ns.decode(&entry).await),
        None => Ok(None),
    }
}

async fn read_only<T: DeserializeOwned>(ns: &Namespace, key: &str) -> Served<T> {
    match read(ns, key, false).await {
        Ok(Some(value)) => (Ok(Some(value)), Outcome::Hit),
        other => (other, Outcome::Miss),
    }
}

async fn fetch_and_store<T, F, Fut>(
    ns: &Namespace,
    key: &str,
    fetch: F,
    options: &SetOptions,
) -> Result<T>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let value = fetch().await.map_err(CacheError::fetch)?;
    store_fetched(ns, key, &value, options).await;
    Ok(value)
}

/// Stores a fetched value. The caller already has the value, so a failed
/// write is logged rather than returned.
async fn store_fetched<T: Serialize>(ns: &Namespace, key: &str, value: &T, options: &SetOptions) {
    if let Err(e) = ns.store(key, value, options).await {
        warn!(namespace = %ns.name(), key, "Failed to store fetched value: {}", e);
    }
}

/// Serves any cached entry, expired or not, after a failed fetch.
async fn fall_back_to_cached<T: DeserializeOwned>(
    ns: &Namespace,
    key: &str,
    err: anyhow::Error,
) -> Result<Option<T>> {
    match read(ns, key, true).await? {
        Some(value) => {
            warn!(namespace = %ns.name(), key, "Fetch failed, serving cached value: {:#}", err);
            Ok(Some(value))
        }
        None => Err(CacheError::fetch(err)),
    }
}

/// Refreshes `key` in the background, keeping the entry's priority, tags and metadata.
fn spawn_revalidation<T, F, Fut>(ns: Arc<Namespace>, key: String, fetch: F, options: SetOptions)
where
    T: Serialize + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    tokio::spawn(async move {
        let name = ns.name().to_string();
        match fetch().await {
            Ok(value) => match ns.store(&key, &value, &options).await {
                Ok(()) => debug!(namespace = %name, key = %key, "Revalidated entry"),
                Err(e) => debug!(namespace = %name, key = %key, "Discarded revalidation: {}", e),
            },
            Err(e) => warn!(namespace = %name, key = %key, "Revalidation fetch failed: {:#}", e),
        }
        ns.end_revalidation(&key).await;
    });
}
