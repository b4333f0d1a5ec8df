//! Cache error types
//!
//! Absence of a key is never an error: reads return `Ok(None)`, `add` and
//! `forget` return booleans. Everything here is a genuine failure, except
//! [`CacheError::LockTimeout`], which the stampede guard handles internally by
//! falling back to an unguarded computation.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable or timed out. Never retried by the core.
    #[error("Cache store unavailable: {0}")]
    StoreUnavailable(String),

    /// `increment`/`decrement` on an entry that is not an integer
    #[error("Cache value for key '{key}' is not an integer")]
    NonNumericValue { key: String },

    /// Plain key inside a namespace the cache keeps for its own entries
    #[error("Cache key '{key}' uses a reserved prefix")]
    ReservedKey { key: String },

    /// Tag operations need atomic add/increment, which this backend lacks
    #[error("Cache store '{driver}' does not support tagging")]
    TagUnsupported { driver: &'static str },

    /// Stampede guard could not acquire the lock or observe the result in time
    #[error("Timed out after {waited:?} waiting for cache lock on '{key}'")]
    LockTimeout { key: String, waited: Duration },

    /// Failed to serialize or deserialize a cached value
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Invalid or unreadable cache configuration
    #[error("Cache configuration error: {0}")]
    Configuration(String),

    /// No factory registered under the requested driver name
    #[error("Cache driver '{0}' is not supported")]
    UnsupportedDriver(String),

    /// No store with this name in the configuration
    #[error("Cache store '{0}' is not defined")]
    UnknownStore(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    /// Whether the error means the backend could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    pub(crate) fn non_numeric(key: &str) -> Self {
        Self::NonNumericValue {
            key: key.to_string(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(e: config::ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::StoreUnavailable(format!("I/O failure: {e}"))
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_key() {
        let err = CacheError::non_numeric("visits");
        assert_eq!(
            err.to_string(),
            "Cache value for key 'visits' is not an integer"
        );

        let err = CacheError::TagUnsupported { driver: "file" };
        assert!(err.to_string().contains("'file'"));

        let err = CacheError::ReservedKey {
            key: "lock:report".to_string(),
        };
        assert!(err.to_string().contains("'lock:report'"));
    }

    #[test]
    fn test_io_error_maps_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CacheError = io.into();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err: CacheError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
