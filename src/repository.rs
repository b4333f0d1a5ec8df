//! # Cache repository
//!
//! The caller-facing API over exactly one [`Store`]. Values are serialized
//! with `serde_json`; defaults and computations are closures evaluated only
//! on a miss; TTLs are normalized through [`Ttl`]; events are emitted after
//! each operation completes.
//!
//! ## Stampede guard
//!
//! `remember` is guarded by default: on a miss the caller takes an advisory
//! lock through the store's atomic `add` before computing, and concurrent
//! callers for the same key wait for the owner's result instead of
//! computing it again. Waiters give up after `wait_timeout` and compute
//! unguarded. [`Repository::without_stampede_guard`] switches to the plain
//! read-then-write behavior.
//!
//! ## Reserved keys
//!
//! Locks, tag versions and tagged entries live in the same store as plain
//! keys, under the prefixes `lock:`, `tag_version:` and `tagged:`. Plain keys
//! starting with one of them are rejected with [`CacheError::ReservedKey`].
//! Keys used through [`TaggedCache`] are hashed into their own namespace and
//! are not restricted.

use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, EventDispatcher};
use crate::lock::{CacheLock, LockOptions, LOCK_KEY_PREFIX};
use crate::store::Store;
use crate::tags::{TagSet, TaggedCache, TAGGED_KEY_PREFIX, TAG_VERSION_PREFIX};
use crate::ttl::{Expiry, Ttl};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Addressing of one cache item: the caller's key, where it is stored, and
/// the tags it was addressed under
#[derive(Debug)]
pub(crate) struct ItemKey<'a> {
    pub key: &'a str,
    pub storage_key: String,
    pub tags: &'a [String],
}

const RESERVED_PREFIXES: [&str; 3] = [LOCK_KEY_PREFIX, TAG_VERSION_PREFIX, TAGGED_KEY_PREFIX];

fn check_plain_key(key: &str) -> CacheResult<()> {
    if RESERVED_PREFIXES.iter().any(|prefix| key.starts_with(prefix)) {
        return Err(CacheError::ReservedKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

impl<'a> ItemKey<'a> {
    fn plain(key: &'a str) -> CacheResult<Self> {
        check_plain_key(key)?;
        Ok(Self {
            key,
            storage_key: key.to_string(),
            tags: &[],
        })
    }
}

/// Backend-agnostic cache operations over one store
#[derive(Debug, Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
    events: EventDispatcher,
    stampede_guard: Option<LockOptions>,
}

impl Repository {
    /// Repository with its own event dispatcher and the stampede guard enabled
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            events: EventDispatcher::default(),
            stampede_guard: Some(LockOptions::default()),
        }
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn with_stampede_guard(mut self, options: LockOptions) -> Self {
        self.stampede_guard = Some(options);
        self
    }

    pub fn without_stampede_guard(mut self) -> Self {
        self.stampede_guard = None;
        self
    }

    pub fn stampede_guard(&self) -> Option<&LockOptions> {
        self.stampede_guard.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Scope operations to a set of tags
    pub fn tags<I, S>(&self, names: I) -> CacheResult<TaggedCache>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = TagSet::new(self.store.clone(), names)?;
        Ok(TaggedCache::new(self.clone(), tags))
    }

    /// A lock in this repository's store, for callers coordinating their own work
    pub fn lock(&self, name: &str, ttl: std::time::Duration) -> CacheLock {
        CacheLock::new(self.store.clone(), name, ttl)
    }

    // ------------------------------------------------------------------
    // Public operations on plain keys
    // ------------------------------------------------------------------

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.get_at(&ItemKey::plain(key)?).await
    }

    /// Stored value, or `default` (which is not stored)
    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> CacheResult<T> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Stored value, or the result of `default` evaluated only on a miss
    pub async fn get_or_else<T, F>(&self, key: &str, default: F) -> CacheResult<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        Ok(self.get(key).await?.unwrap_or_else(default))
    }

    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        self.has_at(&ItemKey::plain(key)?).await
    }

    pub async fn missing(&self, key: &str) -> CacheResult<bool> {
        Ok(!self.has(key).await?)
    }

    /// Get then forget
    pub async fn pull<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.pull_at(&ItemKey::plain(key)?).await
    }

    pub async fn pull_or<T: DeserializeOwned>(&self, key: &str, default: T) -> CacheResult<T> {
        Ok(self.pull(key).await?.unwrap_or(default))
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<Ttl>,
    ) -> CacheResult<()> {
        self.put_at(&ItemKey::plain(key)?, value, ttl.into()).await
    }

    /// Store only if absent; `false` and no side effect otherwise
    pub async fn add<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: impl Into<Ttl>,
    ) -> CacheResult<bool> {
        self.add_at(&ItemKey::plain(key)?, value, ttl.into()).await
    }

    pub async fn forever<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.put_at(&ItemKey::plain(key)?, value, Ttl::Forever).await
    }

    pub async fn forget(&self, key: &str) -> CacheResult<bool> {
        self.forget_at(&ItemKey::plain(key)?).await
    }

    /// Empty the whole backend, including entries of other repositories sharing it
    pub async fn flush(&self) -> CacheResult<()> {
        self.store.flush().await?;
        info!(provider = self.store.provider_name(), "Cache store flushed");
        Ok(())
    }

    pub async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        check_plain_key(key)?;
        self.store.increment(key, delta).await
    }

    pub async fn decrement(&self, key: &str, delta: i64) -> CacheResult<i64> {
        check_plain_key(key)?;
        self.store.decrement(key, delta).await
    }

    /// Cached value, or compute, store for `ttl` and return it
    pub async fn remember<T, F, Fut>(&self, key: &str, ttl: impl Into<Ttl>, compute: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.remember_at(&ItemKey::plain(key)?, ttl.into(), move || async move {
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

    /// `remember` with a fallible computation; nothing is stored on error
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
        self.remember_at(&ItemKey::plain(key)?, ttl.into(), compute).await
    }

    pub async fn many<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> CacheResult<HashMap<String, Option<T>>> {
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            values.insert(key.to_string(), self.get(key).await?);
        }
        Ok(values)
    }

    pub async fn put_many<K, T, I>(&self, items: I, ttl: impl Into<Ttl>) -> CacheResult<()>
    where
        K: AsRef<str>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        let ttl = ttl.into();
        for (key, value) in items {
            self.put(key.as_ref(), &value, ttl).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Item-level implementation shared with TaggedCache
    // ------------------------------------------------------------------

    fn emit(&self, build: impl FnOnce() -> CacheEvent) {
        if self.events.has_observers() {
            self.events.dispatch(build());
        }
    }

    /// Raw read that fires `Hit`/`Missed`
    async fn get_raw_at(&self, item: &ItemKey<'_>) -> CacheResult<Option<Vec<u8>>> {
        match self.store.get(&item.storage_key).await? {
            Some(raw) => {
                debug!(key = item.key, "Cache HIT");
                self.emit(|| CacheEvent::Hit {
                    key: item.key.to_string(),
                    value: raw.clone(),
                    tags: item.tags.to_vec(),
                });
                Ok(Some(raw))
            }
            None => {
                debug!(key = item.key, "Cache MISS");
                self.emit(|| CacheEvent::Missed {
                    key: item.key.to_string(),
                    tags: item.tags.to_vec(),
                });
                Ok(None)
            }
        }
    }

    pub(crate) async fn get_at<T: DeserializeOwned>(
        &self,
        item: &ItemKey<'_>,
    ) -> CacheResult<Option<T>> {
        match self.get_raw_at(item).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read without events, used while waiting on another caller's computation
    async fn peek_at<T: DeserializeOwned>(&self, item: &ItemKey<'_>) -> CacheResult<Option<T>> {
        match self.store.get(&item.storage_key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn has_at(&self, item: &ItemKey<'_>) -> CacheResult<bool> {
        Ok(self.get_raw_at(item).await?.is_some())
    }

    pub(crate) async fn pull_at<T: DeserializeOwned>(
        &self,
        item: &ItemKey<'_>,
    ) -> CacheResult<Option<T>> {
        let Some(value) = self.get_at(item).await? else {
            return Ok(None);
        };
        // A concurrent pull that removed the entry first owns the value
        if self.forget_at(item).await? {
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    pub(crate) async fn put_at<T: Serialize>(
        &self,
        item: &ItemKey<'_>,
        value: &T,
        ttl: Ttl,
    ) -> CacheResult<()> {
        let expiry = ttl.normalize();
        if expiry.is_expired() {
            self.forget_at(item).await?;
            return Ok(());
        }

        let payload = serde_json::to_vec(value)?;
        let store_ttl = expiry.as_store_ttl();
        self.store.put(&item.storage_key, &payload, store_ttl).await?;

        debug!(key = item.key, ttl = ?store_ttl, "Cache WRITE");
        self.emit(|| CacheEvent::Written {
            key: item.key.to_string(),
            value: payload,
            ttl: store_ttl,
            tags: item.tags.to_vec(),
        });
        Ok(())
    }

    pub(crate) async fn add_at<T: Serialize>(
        &self,
        item: &ItemKey<'_>,
        value: &T,
        ttl: Ttl,
    ) -> CacheResult<bool> {
        let expiry = ttl.normalize();
        if expiry.is_expired() {
            return Ok(false);
        }

        let payload = serde_json::to_vec(value)?;
        let store_ttl = expiry.as_store_ttl();
        if !self.store.add(&item.storage_key, &payload, store_ttl).await? {
            return Ok(false);
        }

        self.emit(|| CacheEvent::Written {
            key: item.key.to_string(),
            value: payload,
            ttl: store_ttl,
            tags: item.tags.to_vec(),
        });
        Ok(true)
    }

    pub(crate) async fn forget_at(&self, item: &ItemKey<'_>) -> CacheResult<bool> {
        let removed = self.store.forget(&item.storage_key).await?;
        if removed {
            debug!(key = item.key, "Cache DELETE");
            self.emit(|| CacheEvent::Deleted {
                key: item.key.to_string(),
                tags: item.tags.to_vec(),
            });
        }
        Ok(removed)
    }

    pub(crate) async fn remember_at<T, E, F, Fut>(
        &self,
        item: &ItemKey<'_>,
        ttl: Ttl,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get_at(item).await? {
            return Ok(value);
        }

        let Some(options) = self.stampede_guard else {
            let value = compute().await?;
            self.put_at(item, &value, ttl).await?;
            return Ok(value);
        };

        let lock = CacheLock::new(self.store.clone(), &item.storage_key, options.lock_ttl);
        let started = Instant::now();
        // `None` when the wait is too long to represent: wait indefinitely
        let deadline = started.checked_add(options.wait_timeout);
        let mut backoff = options.poll_interval;

        loop {
            if let Some(guard) = lock.try_acquire().await? {
                // The previous owner may have finished between our miss and this acquisition
                if let Some(value) = self.peek_at(item).await? {
                    guard.release().await?;
                    return Ok(value);
                }

                let value = match compute().await {
                    Ok(value) => value,
                    Err(e) => {
                        if let Err(release_error) = guard.release().await {
                            warn!(key = item.key, error = %release_error, "Failed to release cache lock");
                        }
                        return Err(e);
                    }
                };
                let written = self.put_at(item, &value, ttl).await;
                guard.release().await?;
                written?;
                return Ok(value);
            }

            if let Some(value) = self.peek_at(item).await? {
                debug!(key = item.key, waited = ?started.elapsed(), "Cache value computed by lock owner");
                return Ok(value);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                let timeout = CacheError::LockTimeout {
                    key: item.key.to_string(),
                    waited: now - started,
                };
                warn!(key = item.key, error = %timeout, "Computing without stampede guard");
                let value = compute().await?;
                self.put_at(item, &value, ttl).await?;
                return Ok(value);
            }

            let pause = deadline.map_or(backoff, |deadline| backoff.min(deadline - now));
            tokio::time::sleep(pause).await;
            backoff = options.next_backoff(backoff);
        }
    }

    /// Expiry helper for callers that need the normalized TTL of a write
    pub fn normalize_ttl(ttl: impl Into<Ttl>) -> Expiry {
        ttl.into().normalize()
    }
}
