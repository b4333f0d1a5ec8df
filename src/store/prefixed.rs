//! Key partitioning over a shared physical store
//!
//! The manager wraps every configured store in a `PrefixedStore`, so several
//! logical caches can share one backend. `flush` is deliberately not
//! partitioned: it reaches the inner store and empties the whole backend.

use super::Store;
use crate::error::CacheResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Store wrapper that prepends a prefix to every key
#[derive(Debug, Clone)]
pub struct PrefixedStore {
    inner: Arc<dyn Store>,
    prefix: String,
}

impl PrefixedStore {
    /// A non-empty prefix is terminated with `:` unless it already is
    pub fn new(inner: Arc<dyn Store>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with(':') {
            prefix.push(':');
        }
        Self { inner, prefix }
    }

    pub fn inner(&self) -> &Arc<dyn Store> {
        &self.inner
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl Store for PrefixedStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.inner.get(&self.key(key)).await
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.inner.put(&self.key(key), value, ttl).await
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        self.inner.add(&self.key(key), value, ttl).await
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.inner.increment(&self.key(key), delta).await
    }

    async fn decrement(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.inner.decrement(&self.key(key), delta).await
    }

    async fn forever(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.inner.forever(&self.key(key), value).await
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        self.inner.forget(&self.key(key)).await
    }

    async fn forget_if(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        self.inner.forget_if(&self.key(key), expected).await
    }

    async fn flush(&self) -> CacheResult<()> {
        self.inner.flush().await
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn supports_tags(&self) -> bool {
        self.inner.supports_tags()
    }

    async fn health_check(&self) -> CacheResult<bool> {
        self.inner.health_check().await
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_prefix_gets_separator() {
        let inner: Arc<dyn Store> = Arc::new(MemoryStore::new());
        assert_eq!(PrefixedStore::new(inner.clone(), "app").prefix(), "app:");
        assert_eq!(PrefixedStore::new(inner.clone(), "app:").prefix(), "app:");
        assert_eq!(PrefixedStore::new(inner, "").prefix(), "");
    }

    #[tokio::test]
    async fn test_prefixes_partition_keys() {
        let inner = Arc::new(MemoryStore::new());
        let a = PrefixedStore::new(inner.clone(), "a");
        let b = PrefixedStore::new(inner.clone(), "b");

        a.forever("k", b"from-a").await.unwrap();
        b.forever("k", b"from-b").await.unwrap();

        assert_eq!(a.get("k").await.unwrap(), Some(b"from-a".to_vec()));
        assert_eq!(b.get("k").await.unwrap(), Some(b"from-b".to_vec()));
        assert_eq!(inner.get("a:k").await.unwrap(), Some(b"from-a".to_vec()));
    }

    #[tokio::test]
    async fn test_flush_ignores_partitioning() {
        let inner = Arc::new(MemoryStore::new());
        let a = PrefixedStore::new(inner.clone(), "a");
        let b = PrefixedStore::new(inner.clone(), "b");
        a.forever("k", b"1").await.unwrap();
        b.forever("k", b"2").await.unwrap();

        a.flush().await.unwrap();

        assert_eq!(b.get("k").await.unwrap(), None);
        assert!(inner.is_empty());
    }
}
