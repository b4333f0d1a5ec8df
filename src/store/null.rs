//! No-op store
//!
//! Always misses, always succeeds. Used when caching is disabled.

use super::Store;
use crate::error::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Store that never keeps anything
#[derive(Debug, Clone, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Store for NullStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> CacheResult<()> {
        Ok(())
    }

    /// Reports success so lock acquisition and tag version creation never stall
    async fn add(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> CacheResult<bool> {
        Ok(true)
    }

    async fn increment(&self, _key: &str, delta: i64) -> CacheResult<i64> {
        Ok(delta)
    }

    async fn forget(&self, _key: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn flush(&self) -> CacheResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "null"
    }
}
