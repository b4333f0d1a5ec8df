//! # Store contract
//!
//! The minimal persistence contract every backend implements. A store knows
//! nothing about tags, defaults, serialization or events; it moves opaque
//! bytes under opaque string keys.
//!
//! ```text
//! Store (trait object)
//!   ├── MemoryStore    <- DashMap, atomic per key, lazy expiry
//!   ├── FileStore      <- one file per key, no tag support
//!   ├── NullStore      <- always miss, always succeed
//!   ├── PrefixedStore  <- key partitioning applied by the manager
//!   ├── RedisStore     <- feature "store-redis"
//!   └── DatabaseStore  <- feature "store-postgres"
//! ```
//!
//! ## Atomicity
//!
//! `add`, `increment` and `decrement` must each be a single indivisible
//! backend operation. Everything else may be a plain read or write.

pub mod file;
pub mod memory;
pub mod null;
pub mod prefixed;

#[cfg(feature = "store-redis")]
pub mod redis;

#[cfg(feature = "store-postgres")]
pub mod database;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use null::NullStore;
pub use prefixed::PrefixedStore;

#[cfg(feature = "store-redis")]
pub use self::redis::RedisStore;

#[cfg(feature = "store-postgres")]
pub use self::database::DatabaseStore;

use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::time::Duration;

/// Backend persistence contract
///
/// TTL convention for every write: `None` keeps the entry until it is
/// explicitly removed, `Some(Duration::ZERO)` means "already expired" and
/// removes any existing entry.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Get a value, `Ok(None)` on miss or lazily-expired entry
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Store only if the key is currently absent. Must be atomic.
    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool>;

    /// Atomic fetch-and-add; an absent key starts at 0
    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64>;

    async fn decrement(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let negated = delta
            .checked_neg()
            .ok_or_else(|| CacheError::Backend(format!("decrement by {delta} overflows")))?;
        self.increment(key, negated).await
    }

    async fn forever(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.put(key, value, None).await
    }

    /// Remove a key, returning whether anything was removed
    async fn forget(&self, key: &str) -> CacheResult<bool>;

    /// Remove a key only while it still holds `expected`
    ///
    /// The default is a get-compare-forget sequence; backends with a native
    /// compare-and-delete should override it.
    async fn forget_if(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        match self.get(key).await? {
            Some(current) if current == expected => self.forget(key).await,
            _ => Ok(false),
        }
    }

    /// Remove every entry in the physical backend, regardless of prefix
    async fn flush(&self) -> CacheResult<()>;

    fn prefix(&self) -> &str {
        ""
    }

    /// Whether `add`/`increment` are atomic across every process sharing
    /// the backend, which tag versioning depends on
    fn supports_tags(&self) -> bool {
        true
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str;
}

/// Parse a stored counter value
pub(crate) fn parse_counter(key: &str, raw: &[u8]) -> CacheResult<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| CacheError::non_numeric(key))
}

pub(crate) fn apply_delta(key: &str, current: i64, delta: i64) -> CacheResult<i64> {
    current
        .checked_add(delta)
        .ok_or_else(|| CacheError::Backend(format!("counter '{key}' overflowed")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter_accepts_integers() {
        assert_eq!(parse_counter("k", b"42").unwrap(), 42);
        assert_eq!(parse_counter("k", b"-7").unwrap(), -7);
    }

    #[test]
    fn test_parse_counter_rejects_other_values() {
        assert!(matches!(
            parse_counter("k", br#"{"a":1}"#),
            Err(CacheError::NonNumericValue { .. })
        ));
        assert!(parse_counter("k", b"1.5").is_err());
        assert!(parse_counter("k", &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_apply_delta_detects_overflow() {
        assert_eq!(apply_delta("k", 5, -2).unwrap(), 3);
        assert!(apply_delta("k", i64::MAX, 1).is_err());
    }
}
