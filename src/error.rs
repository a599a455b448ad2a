//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
///
/// `Clone` so that a single leader failure can be handed to every caller
/// waiting on the same key.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The storage backend could not be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The storage backend did not answer in time
    #[error("Backend timed out after {0:?}")]
    BackendTimeout(Duration),

    /// Stored bytes do not match the codec's wire shape
    #[error("Corrupt value for key {key}: {reason}")]
    CorruptValue { key: String, reason: String },

    /// The value cannot be represented by the codec
    #[error("Value cannot be encoded: {0}")]
    UnencodableValue(String),

    /// The fallback computation failed
    #[error("Fallback failed: {0}")]
    Fallback(Arc<anyhow::Error>),

    /// A follower gave up waiting for the in-flight resolution
    #[error("Timed out after {waited:?} waiting for in-flight resolution of {key}")]
    LockTimeout { key: String, waited: Duration },

    /// The leader went away before finishing (cancelled or panicked)
    #[error("Resolution of {key} was abandoned by its leader")]
    ResolutionAborted { key: String },

    /// The leader exceeded the maximum resolution duration
    #[error("Resolution of {key} exceeded {limit:?}")]
    ResolutionTimeout { key: String, limit: Duration },

    /// Configuration values are inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Wraps an error returned by a fallback.
    pub fn fallback(err: anyhow::Error) -> Self {
        CacheError::Fallback(Arc::new(err))
    }

    /// Returns true for storage adapter I/O failures.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            CacheError::BackendUnavailable(_) | CacheError::BackendTimeout(_)
        )
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => CacheError::BackendTimeout(Duration::ZERO),
            _ => CacheError::BackendUnavailable(err.to_string()),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
