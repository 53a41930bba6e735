//! Adaptive Cache - An in-process, multi-namespace caching engine
//!
//! Namespaces each carry their own fetch strategy, byte budget, TTL and
//! payload transforms (zstd compression, AES-256-GCM encryption). Entries are
//! evicted by priority then recency, expired entries are swept on a timer and
//! budgets are tuned from the observed hit rate.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod tasks;

pub use cache::{
    CacheEntry, FetchStrategy, NamespaceSnapshot, NamespaceStats, Priority, SetOptions,
    TuneOutcome,
};
pub use config::{Config, NamespaceConfig};
pub use engine::CacheEngine;
pub use error::{CacheError, Result};
