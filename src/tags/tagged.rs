use super::TagSet;
use crate::error::{CacheError, CacheResult};
use crate::repository::{ItemKey, Repository};
use crate::ttl::Ttl;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use tracing::info;

/// Repository operations scoped to a tag set
///
/// Every key is stored under the namespace derived from the current tag
/// versions, so `flush` here only affects entries written under these tags.
/// Events report the caller's key together with the tag names.
#[derive(Debug, Clone)]
pub struct TaggedCache {
    repository: Repository,
    tags: TagSet,
}

impl TaggedCache {
    pub fn new(repository: Repository, tags: TagSet) -> Self {
        Self { repository, tags }
    }

    pub fn tag_set(&self) -> &TagSet {
        &self.tags
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    async fn item<'a>(&'a self, key: &'a str) -> CacheResult<ItemKey<'a>> {
        Ok(ItemKey {
            key,
            storage_key: self.tags.namespaced_key(key).await?,
            tags: self.tags.names(),
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let item = self.item(key).await?;
        self.repository.get_at(&item).await
    }

    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> CacheResult<T> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    pub async fn get_or_else<T, F>(&self, key: &str, default: F) -> CacheResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        Ok(self.get(key).await?.unwrap_or_else(default))
    }

    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        let item = self.item(key).await?;
        self.repository.has_at(&item).await
    }

    pub async fn missing(&self, key: &str) -> CacheResult<bool> {
        Ok(!self.has(key).await?)
    }

    pub async fn pull<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let item = self.item(key).await?;
        self.repository.pull_at(&item).await
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<Ttl>,
    ) -> CacheResult<()> {
        let item = self.item(key).await?;
        self.repository.put_at(&item, value, ttl.into()).await
    }

    pub async fn add<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<Ttl>,
    ) -> CacheResult<bool> {
        let item = self.item(key).await?;
        self.repository.add_at(&item, value, ttl.into()).await
    }

    pub async fn forever<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.put(key, value, Ttl::Forever).await
    }

    pub async fn forget(&self, key: &str) -> CacheResult<bool> {
        let item = self.item(key).await?;
        self.repository.forget_at(&item).await
    }

    pub async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let item = self.item(key).await?;
        self.repository.store().increment(&item.storage_key, delta).await
    }

    pub async fn decrement(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let item = self.item(key).await?;
        self.repository.store().decrement(&item.storage_key, delta).await
    }

    pub async fn remember<T, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Ttl>,
        compute: F,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let item = self.item(key).await?;
        self.repository
            .remember_at(&item, ttl.into(), move || async move {
                Ok::<T, CacheError>(compute().await)
            })
            .await
    }

    pub async fn remember_forever<T, F, Fut>(&self, key: &str, compute: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.remember(key, Ttl::Forever, compute).await
    }

    pub async fn try_remember<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Ttl>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let item = self.item(key).await?;
        self.repository.remember_at(&item, ttl.into(), compute).await
    }

    /// Invalidate every entry stored under any of these tags
    pub async fn flush(&self) -> CacheResult<()> {
        let versions = self.tags.reset().await?;
        info!(tags = ?self.tags.names(), reset = versions.len(), "Cache tags flushed");
        Ok(())
    }
}
