//! # Advisory cache locks
//!
//! Short-lived locks built from a store's atomic `add`. They are the basis of
//! the stampede guard around `remember`, and usable directly for any
//! "only one caller at a time" section that spans processes sharing a store.
//!
//! A lock is held by an owner token. Release is a compare-and-delete, so a
//! caller whose lock already expired cannot remove someone else's lock. A
//! [`LockGuard`] dropped without an explicit release (for example because the
//! future holding it was cancelled) hands the release to the Tokio runtime
//! instead of leaving the lock in place until its TTL runs out.

use crate::error::{CacheError, CacheResult};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Reserved key prefix for lock entries
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Timing of the stampede guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lifetime of the lock entry; bounds how long a crashed owner blocks others
    pub lock_ttl: Duration,
    /// How long a waiter polls before giving up and computing itself
    pub wait_timeout: Duration,
    /// First poll delay, doubled after every unsuccessful poll
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(20),
            max_poll_interval: Duration::from_millis(500),
        }
    }
}

impl LockOptions {
    pub(crate) fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_poll_interval)
    }
}

/// A named lock in a store, owned by a random token
#[derive(Debug, Clone)]
pub struct CacheLock {
    store: Arc<dyn Store>,
    key: String,
    owner: String,
    ttl: Duration,
}

impl CacheLock {
    pub fn new(store: Arc<dyn Store>, name: &str, ttl: Duration) -> Self {
        Self {
            store,
            key: format!("{LOCK_KEY_PREFIX}{name}"),
            owner: uuid::Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Single acquisition attempt; `None` when another owner holds the lock
    pub async fn try_acquire(&self) -> CacheResult<Option<LockGuard>> {
        let acquired = self
            .store
            .add(&self.key, self.owner.as_bytes(), Some(self.ttl))
            .await?;

        if !acquired {
            return Ok(None);
        }
        debug!(lock = %self.key, ttl = ?self.ttl, "Cache lock acquired");
        Ok(Some(LockGuard {
            store: self.store.clone(),
            key: self.key.clone(),
            owner: self.owner.clone(),
            released: false,
        }))
    }

    /// Retry acquisition with backoff until `wait` elapses
    pub async fn acquire_within(
        &self,
        wait: Duration,
        options: &LockOptions,
    ) -> CacheResult<LockGuard> {
        let started = Instant::now();
        let deadline = started.checked_add(wait);
        let mut backoff = options.poll_interval;

        loop {
            if let Some(guard) = self.try_acquire().await? {
                return Ok(guard);
            }
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(CacheError::LockTimeout {
                        key: self.key.clone(),
                        waited: now - started,
                    });
                }
                Some(deadline) => backoff.min(deadline - now),
                None => backoff,
            };
            tokio::time::sleep(remaining).await;
            backoff = options.next_backoff(backoff);
        }
    }
}

/// Proof of lock ownership
#[derive(Debug)]
pub struct LockGuard {
    store: Arc<dyn Store>,
    key: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock, returning whether it was still ours to release
    pub async fn release(mut self) -> CacheResult<bool> {
        let result = self.store.forget_if(&self.key, self.owner.as_bytes()).await;
        self.released = true;
        if matches!(result, Ok(false)) {
            debug!(lock = %self.key, "Cache lock expired before release");
        }
        result
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                let key = std::mem::take(&mut self.key);
                let owner = std::mem::take(&mut self.owner);
                handle.spawn(async move {
                    match store.forget_if(&key, owner.as_bytes()).await {
                        Ok(_) => debug!(lock = %key, "Abandoned cache lock released"),
                        Err(e) => warn!(lock = %key, error = %e, "Failed to release abandoned cache lock"),
                    }
                });
            }
            Err(_) => {
                warn!(lock = %self.key, "No runtime to release abandoned cache lock; it will expire");
            }
        }
    }
}
