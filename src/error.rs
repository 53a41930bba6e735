//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

use crate::cache::TransformError;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation on a namespace that was never created (or was dropped)
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Attempt to create a namespace whose name is already registered
    #[error("Namespace already exists: {0}")]
    NamespaceExists(String),

    /// Operation issued after `cleanup()` tore the engine down
    #[error("Cache engine has been shut down")]
    EngineShutDown,

    /// Invalid key, option or namespace configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller-supplied fetch function failed
    #[error("Fetch failed: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Value could not be encoded to or decoded from bytes
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transform worker failure that could not be recovered locally
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),
}

impl CacheError {
    // == Fetch Wrapper ==
    /// Wraps an error returned by a fetch function.
    pub fn fetch(err: anyhow::Error) -> Self {
        CacheError::Fetch(err.into())
    }

    // == Configuration Error ==
    /// True for errors caused by misuse of the namespace lifecycle.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CacheError::NamespaceNotFound(_)
                | CacheError::NamespaceExists(_)
                | CacheError::EngineShutDown
        )
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_keeps_message() {
        let err = CacheError::fetch(anyhow::anyhow!("upstream timed out"));
        assert!(err.to_string().contains("upstream timed out"));
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn test_configuration_errors() {
        assert!(CacheError::NamespaceNotFound("ns".into()).is_configuration_error());
        assert!(CacheError::NamespaceExists("ns".into()).is_configuration_error());
        assert!(CacheError::EngineShutDown.is_configuration_error());
        assert!(!CacheError::InvalidRequest("bad".into()).is_configuration_error());
    }
}
