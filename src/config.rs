//! Configuration Module
//!
//! Engine-wide settings loaded from environment variables, and the
//! per-namespace configuration accepted by `CacheEngine::create_namespace`.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{duration_ms, FetchStrategy};

/// Length in bytes of an AES-256 key.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Lower bound for the expiry sweeper interval.
pub const MIN_SWEEP_INTERVAL_MS: u64 = 10;

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// Auto-tuner interval in seconds
    pub tune_interval: u64,
    /// Zstd compression level
    pub zstd_level: i32,
    /// Payloads smaller than this are stored uncompressed
    pub compression_min_size: usize,
    /// AES-256-GCM key; encryption falls back to plaintext when absent
    pub encryption_key: Option<[u8; ENCRYPTION_KEY_LEN]>,
    /// Optional JSON file with an array of namespace definitions
    pub namespaces_file: Option<PathBuf>,
    /// Number of simulated callers driven by the binary
    pub sim_workers: usize,
    /// Number of distinct keys the simulated callers touch
    pub sim_key_space: u64,
    /// Stats report interval in seconds
    pub report_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_TUNE_INTERVAL` - Auto-tuner interval in seconds (default: 60)
    /// - `CACHE_ZSTD_LEVEL` - Zstd level (default: 3)
    /// - `CACHE_COMPRESSION_MIN_SIZE` - Minimum payload size to compress (default: 256)
    /// - `CACHE_ENCRYPTION_KEY` - Base64 encoded 32 byte key (default: none)
    /// - `CACHE_NAMESPACES_FILE` - Path to a JSON namespace list (default: none)
    /// - `CACHE_SIM_WORKERS` - Simulated callers (default: 4)
    /// - `CACHE_SIM_KEY_SPACE` - Simulated key space (default: 500)
    /// - `CACHE_REPORT_INTERVAL` - Stats report interval in seconds (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tune_interval: parse_var("CACHE_TUNE_INTERVAL").unwrap_or(defaults.tune_interval),
            zstd_level: parse_var("CACHE_ZSTD_LEVEL").unwrap_or(defaults.zstd_level),
            compression_min_size: parse_var("CACHE_COMPRESSION_MIN_SIZE")
                .unwrap_or(defaults.compression_min_size),
            encryption_key: key_from_var(env::var("CACHE_ENCRYPTION_KEY").ok().as_deref()),
            namespaces_file: env::var("CACHE_NAMESPACES_FILE").ok().map(PathBuf::from),
            sim_workers: parse_var("CACHE_SIM_WORKERS").unwrap_or(defaults.sim_workers),
            sim_key_space: parse_var("CACHE_SIM_KEY_SPACE").unwrap_or(defaults.sim_key_space),
            report_interval: parse_var("CACHE_REPORT_INTERVAL")
                .unwrap_or(defaults.report_interval),
        }
    }

    /// Sets the encryption key.
    pub fn with_encryption_key(mut self, key: [u8; ENCRYPTION_KEY_LEN]) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Sets the auto-tuner interval in seconds.
    pub fn with_tune_interval(mut self, secs: u64) -> Self {
        self.tune_interval = secs;
        self
    }

    /// Sets the minimum payload size that gets compressed.
    pub fn with_compression_min_size(mut self, bytes: usize) -> Self {
        self.compression_min_size = bytes;
        self
    }

    /// Auto-tuner interval as a Duration (never zero).
    pub fn tune_interval(&self) -> Duration {
        Duration::from_secs(self.tune_interval.max(1))
    }

    /// Loads namespace definitions from `namespaces_file`, if one is set.
    pub fn load_namespaces(&self) -> anyhow::Result<Option<Vec<NamespaceConfig>>> {
        let Some(path) = &self.namespaces_file else {
            return Ok(None);
        };
        let raw = std::fs::read_to_string(path)?;
        let namespaces: Vec<NamespaceConfig> = serde_json::from_str(&raw)?;
        Ok(Some(namespaces))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tune_interval: 60,
            zstd_level: 3,
            compression_min_size: 256,
            encryption_key: None,
            namespaces_file: None,
            sim_workers: 4,
            sim_key_space: 500,
            report_interval: 10,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("tune_interval", &self.tune_interval)
            .field("zstd_level", &self.zstd_level)
            .field("compression_min_size", &self.compression_min_size)
            .field(
                "encryption_key",
                &self.encryption_key.map(|_| "<redacted>"),
            )
            .field("namespaces_file", &self.namespaces_file)
            .field("sim_workers", &self.sim_workers)
            .field("sim_key_space", &self.sim_key_space)
            .field("report_interval", &self.report_interval)
            .finish()
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Decodes the key variable, warning when it is set but unusable.
fn key_from_var(raw: Option<&str>) -> Option<[u8; ENCRYPTION_KEY_LEN]> {
    let raw = raw?;
    let key = decode_key(raw);
    if key.is_none() {
        warn!(
            "CACHE_ENCRYPTION_KEY is not base64 for {} bytes, encryption disabled",
            ENCRYPTION_KEY_LEN
        );
    }
    key
}

/// Decodes a base64 key, rejecting anything that is not exactly 32 bytes.
pub fn decode_key(encoded: &str) -> Option<[u8; ENCRYPTION_KEY_LEN]> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    bytes.try_into().ok()
}

// == Namespace Config ==
/// Configuration of one independently managed cache region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Unique namespace name
    pub name: String,
    /// Version tag; snapshots from another version are discarded on import
    #[serde(default = "default_version")]
    pub version: String,
    /// Size budget in bytes of stored payloads
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Default time-to-live in milliseconds
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    /// Fetch strategy applied on `get`
    #[serde(default)]
    pub strategy: FetchStrategy,
    /// Compress payloads before storing them
    #[serde(default)]
    pub compression: bool,
    /// Encrypt payloads before storing them
    #[serde(default)]
    pub encryption: bool,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_max_size() -> u64 {
    10 * 1024 * 1024
}

fn default_max_age_ms() -> u64 {
    5 * 60 * 1000
}

impl NamespaceConfig {
    /// Creates a config with default budget, TTL and the cache-first strategy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            max_size: default_max_size(),
            max_age_ms: default_max_age_ms(),
            strategy: FetchStrategy::default(),
            compression: false,
            encryption: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_ms = duration_ms(max_age);
        self
    }

    pub fn with_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption = enabled;
        self
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.name.trim().is_empty() {
            return Some("Namespace name cannot be empty".to_string());
        }
        if self.max_size == 0 {
            return Some("Namespace max_size must be greater than zero".to_string());
        }
        if self.max_age_ms == 0 {
            return Some("Namespace max_age_ms must be greater than zero".to_string());
        }
        None
    }

    /// Expiry sweeper interval: a tenth of the default TTL.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis((self.max_age_ms / 10).max(MIN_SWEEP_INTERVAL_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.tune_interval, 60);
        assert_eq!(config.zstd_level, 3);
        assert_eq!(config.compression_min_size, 256);
        assert!(config.encryption_key.is_none());
        assert!(config.namespaces_file.is_none());
    }

    #[test]
    fn test_config_from_env_defaults() {
        env::remove_var("CACHE_TUNE_INTERVAL");
        env::remove_var("CACHE_ZSTD_LEVEL");
        env::remove_var("CACHE_COMPRESSION_MIN_SIZE");
        env::remove_var("CACHE_ENCRYPTION_KEY");
        env::remove_var("CACHE_NAMESPACES_FILE");

        let config = Config::from_env();
        assert_eq!(config.tune_interval, 60);
        assert_eq!(config.zstd_level, 3);
        assert_eq!(config.compression_min_size, 256);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn test_decode_key() {
        let key = [7u8; ENCRYPTION_KEY_LEN];
        let encoded = STANDARD.encode(key);
        assert_eq!(decode_key(&encoded), Some(key));

        // Wrong length
        assert_eq!(decode_key(&STANDARD.encode([1u8; 16])), None);
        // Not base64
        assert_eq!(decode_key("not base64 !!"), None);
    }

    #[test]
    fn test_malformed_key_var_disables_encryption() {
        assert_eq!(key_from_var(None), None);
        assert_eq!(key_from_var(Some("short")), None);
        assert_eq!(key_from_var(Some(&STANDARD.encode([1u8; 16]))), None);

        let key = [5u8; ENCRYPTION_KEY_LEN];
        assert_eq!(key_from_var(Some(&STANDARD.encode(key))), Some(key));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::default().with_encryption_key([9u8; ENCRYPTION_KEY_LEN]);
        let printed = format!("{:?}", config);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("9, 9"));
    }

    #[test]
    fn test_namespace_config_from_json_defaults() {
        let json = r#"{"name": "users", "strategy": "stale-while-revalidate"}"#;
        let config: NamespaceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "users");
        assert_eq!(config.version, "1");
        assert_eq!(config.strategy, FetchStrategy::StaleWhileRevalidate);
        assert_eq!(config.max_size, 10 * 1024 * 1024);
        assert!(!config.compression);
    }

    #[test]
    fn test_namespace_config_validate() {
        assert!(NamespaceConfig::new("ok").validate().is_none());
        assert!(NamespaceConfig::new("").validate().is_some());
        assert!(NamespaceConfig::new("ns").with_max_size(0).validate().is_some());
        assert!(NamespaceConfig::new("ns")
            .with_max_age(Duration::ZERO)
            .validate()
            .is_some());
    }

    #[test]
    fn test_max_age_saturates() {
        let config = NamespaceConfig::new("ns").with_max_age(Duration::MAX);
        assert_eq!(config.max_age_ms, u64::MAX);
        assert!(config.validate().is_none());
    }

    #[test]
    fn test_sweep_interval_is_tenth_of_ttl() {
        let config = NamespaceConfig::new("ns").with_max_age(Duration::from_secs(60));
        assert_eq!(config.sweep_interval(), Duration::from_secs(6));

        let tiny = NamespaceConfig::new("ns").with_max_age(Duration::from_millis(20));
        assert_eq!(tiny.sweep_interval(), Duration::from_millis(MIN_SWEEP_INTERVAL_MS));
    }
}
