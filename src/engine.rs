//! Cache Engine Module
//!
//! The registry of namespaces and the public get/set/invalidate contract.
//!
//! A `CacheEngine` is constructed explicitly, shared by reference (or in an
//! `Arc`) with its consumers, and torn down with `cleanup()`. Namespaces are
//! independent: each has its own lock, sweeper and tuner.

use std::collections::HashMap;
use std::future::{Future, Ready};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::{
    self, validate_key, CacheEntry, Codec, Namespace, NamespaceSnapshot, NamespaceStats,
    SetOptions, Transformer, TuneOutcome,
};
use crate::config::{Config, NamespaceConfig};
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_sweeper_task, spawn_tuning_task};

/// Fetch function type used by `get` when no fetch is supplied.
type NoFetch<T> = fn() -> Ready<anyhow::Result<T>>;

// == Cache Engine ==
pub struct CacheEngine {
    config: Config,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
    transformer: Transformer,
    worker: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl CacheEngine {
    // == Constructor ==
    /// Creates an engine and starts its transform worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Self {
        let (transformer, worker) = Transformer::spawn(Codec::from_config(&config));
        info!(
            encryption_available = transformer.can_encrypt(),
            "Cache engine started"
        );
        Self {
            config,
            namespaces: RwLock::new(HashMap::new()),
            transformer,
            worker: Mutex::new(Some(worker)),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            error!("Cache engine used after cleanup");
            return Err(CacheError::EngineShutDown);
        }
        Ok(())
    }

    async fn namespace(&self, name: &str) -> Result<Arc<Namespace>> {
        self.ensure_running()?;
        match self.namespaces.read().await.get(name) {
            Some(ns) => Ok(Arc::clone(ns)),
            None => {
                error!(namespace = name, "Operation on unknown namespace");
                Err(CacheError::NamespaceNotFound(name.to_string()))
            }
        }
    }

    // == Create Namespace ==
    /// Registers a namespace and starts its sweeper and tuner.
    pub async fn create_namespace(&self, config: NamespaceConfig) -> Result<()> {
        self.ensure_running()?;
        if let Some(msg) = config.validate() {
            return Err(CacheError::InvalidRequest(msg));
        }

        let mut namespaces = self.namespaces.write().await;
        self.ensure_running()?;
        if namespaces.contains_key(&config.name) {
            error!(namespace = %config.name, "Namespace created twice");
            return Err(CacheError::NamespaceExists(config.name));
        }

        if config.encryption && !self.transformer.can_encrypt() {
            warn!(
                namespace = %config.name,
                "Encryption requested but no key is configured, payloads will be stored unencrypted"
            );
        }

        let ns = Namespace::new(config, self.transformer.clone());
        let sweeper = spawn_sweeper_task(Arc::downgrade(&ns), ns.config().sweep_interval());
        let tuner = spawn_tuning_task(Arc::downgrade(&ns), self.config.tune_interval());
        ns.attach_tasks([sweeper, tuner]).await;

        info!(
            namespace = %ns.name(),
            version = %ns.config().version,
            strategy = %ns.config().strategy,
            max_size = ns.config().max_size,
            max_age_ms = ns.config().max_age_ms,
            compression = ns.config().compression,
            encryption = ns.config().encryption,
            "Namespace created"
        );
        namespaces.insert(ns.name().to_string(), ns);
        Ok(())
    }

    // == Drop Namespace ==
    /// Tears down a single namespace.
    pub async fn drop_namespace(&self, name: &str) -> Result<()> {
        self.ensure_running()?;
        let removed = self.namespaces.write().await.remove(name);
        match removed {
            Some(ns) => {
                ns.shutdown().await;
                Ok(())
            }
            None => Err(CacheError::NamespaceNotFound(name.to_string())),
        }
    }

    /// Names of all registered namespaces, sorted.
    pub async fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    // == Get ==
    /// Reads a value through the namespace's strategy without a fetch function.
    ///
    /// Absent values resolve to `Ok(None)`.
    pub async fn get<T>(&self, namespace: &str, key: &str) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        validate_key(key)?;
        let ns = self.namespace(namespace).await?;
        cache::execute(&ns, key, None::<NoFetch<T>>).await
    }

    // == Get With ==
    /// Reads a value through the namespace's strategy, calling `fetch` when
    /// the strategy asks for the source of truth.
    ///
    /// Resolves to the value or to the fetch error; never to corrupted data.
    pub async fn get_with<T, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        fetch: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        validate_key(key)?;
        let ns = self.namespace(namespace).await?;
        cache::execute(&ns, key, Some(fetch)).await
    }

    // == Set ==
    pub async fn set<T>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        validate_key(key)?;
        let ns = self.namespace(namespace).await?;
        ns.store(key, value, &options).await
    }

    // == Invalidate ==
    /// Removes one entry, or clears the namespace when `key` is `None`.
    ///
    /// Returns the number of entries removed.
    pub async fn invalidate(&self, namespace: &str, key: Option<&str>) -> Result<usize> {
        let ns = self.namespace(namespace).await?;
        ns.invalidate(key).await
    }

    /// Removes every entry carrying `tag`.
    pub async fn invalidate_by_tag(&self, namespace: &str, tag: &str) -> Result<usize> {
        let ns = self.namespace(namespace).await?;
        ns.invalidate_by_tag(tag).await
    }

    // == Stats ==
    /// Returns `None` for unknown namespaces or after cleanup.
    pub async fn get_stats(&self, namespace: &str) -> Option<NamespaceStats> {
        if self.is_shut_down() {
            return None;
        }
        let ns = self.namespaces.read().await.get(namespace).cloned()?;
        Some(ns.stats().await)
    }

    // == Export / Import ==
    /// Unexpired entries in their stored form, ordered by creation time.
    pub async fn export_entries(&self, namespace: &str) -> Result<Vec<CacheEntry>> {
        let ns = self.namespace(namespace).await?;
        ns.export().await
    }

    /// Restores entries produced by `export_entries`.
    ///
    /// Expired entries are skipped and the budget is enforced as for `set`.
    pub async fn import_entries(&self, namespace: &str, entries: Vec<CacheEntry>) -> Result<usize> {
        let ns = self.namespace(namespace).await?;
        for entry in &entries {
            validate_key(&entry.key)?;
        }
        ns.import(entries).await
    }

    pub async fn export_snapshot(&self, namespace: &str) -> Result<NamespaceSnapshot> {
        let ns = self.namespace(namespace).await?;
        let entries = ns.export().await?;
        Ok(NamespaceSnapshot::new(ns.name(), ns.config().version.clone(), entries))
    }

    /// Restores a snapshot; one taken under a different version tag is discarded.
    pub async fn import_snapshot(
        &self,
        namespace: &str,
        snapshot: NamespaceSnapshot,
    ) -> Result<usize> {
        let ns = self.namespace(namespace).await?;
        if snapshot.version != ns.config().version {
            warn!(
                namespace,
                snapshot_version = %snapshot.version,
                current_version = %ns.config().version,
                "Discarding snapshot from another version"
            );
            return Ok(0);
        }
        self.import_entries(namespace, snapshot.entries).await
    }

    // == Maintenance ==
    /// Runs one expiry sweep now.
    pub async fn sweep(&self, namespace: &str) -> Result<usize> {
        let ns = self.namespace(namespace).await?;
        ns.sweep().await
    }

    /// Runs one auto-tuning step now.
    pub async fn tune(&self, namespace: &str) -> Result<TuneOutcome> {
        let ns = self.namespace(namespace).await?;
        ns.tune().await
    }

    // == Cleanup ==
    /// Process-wide teardown: cancels all timers, stops the transform worker
    /// and clears every namespace. Later calls fail with `EngineShutDown`.
    pub async fn cleanup(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<Arc<Namespace>> = self
            .namespaces
            .write()
            .await
            .drain()
            .map(|(_, ns)| ns)
            .collect();
        let count = drained.len();
        for ns in drained {
            ns.shutdown().await;
        }

        self.transformer.shutdown();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!("Transform worker ended abnormally: {}", e);
            }
        }

        info!(namespaces = count, "Cache engine shut down");
    }
}
