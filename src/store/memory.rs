//! In-process store backed by `DashMap`
//!
//! Every mutation goes through DashMap's entry API, which holds the shard
//! lock for the key, so `add` and `increment` are atomic with respect to
//! every other caller in the process. Expired entries are dropped lazily on
//! access; an optional capacity bound evicts the entries closest to expiry.
//!
//! **Important**: this store is NOT distributed. Clones share state, separate
//! instances do not.

use super::{apply_delta, parse_counter, Store};
use crate::error::CacheResult;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(value: &[u8], ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value: value.to_vec(),
            // A TTL past the clock's range never expires
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredEntry>>,
    max_capacity: Option<usize>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entry_count", &self.entries.len())
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of live entries; zero means unbounded
    pub fn with_capacity_limit(max_capacity: usize) -> Self {
        Self {
            entries: Arc::default(),
            max_capacity: (max_capacity > 0).then_some(max_capacity),
        }
    }

    /// Number of physically present entries, including not-yet-reclaimed expired ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Physically remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn enforce_capacity(&self) {
        let Some(max) = self.max_capacity else {
            return;
        };
        if self.entries.len() <= max {
            return;
        }

        let purged = self.purge_expired();
        if self.entries.len() > max {
            let mut candidates: Vec<(String, Option<Instant>)> = self
                .entries
                .iter()
                .map(|item| (item.key().clone(), item.value().expires_at))
                .collect();
            // Evict down to 90% of capacity so the writes that follow skip this scan
            let excess = candidates.len().saturating_sub(max - max / 10);
            if excess > 0 {
                // Entries closest to expiry go first; forever entries only when nothing else is left
                candidates.select_nth_unstable_by_key(excess - 1, |(_, at)| (at.is_none(), *at));
                for (key, _) in candidates.into_iter().take(excess) {
                    self.entries.remove(&key);
                    debug!(key = %key, "Cache EVICT (memory)");
                }
            }
        }
        debug!(purged = purged, max_capacity = max, "Memory store capacity enforced");
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        debug!(key = key, "Cache EXPIRED (memory)");
        Ok(None)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            self.entries.remove(key);
            return Ok(());
        }

        self.entries
            .insert(key.to_string(), StoredEntry::new(value, ttl, Instant::now()));
        self.enforce_capacity();
        Ok(())
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Ok(false);
        }

        let now = Instant::now();
        let added = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(StoredEntry::new(value, ttl, now));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(value, ttl, now));
                true
            }
        };

        if added {
            self.enforce_capacity();
        }
        Ok(added)
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let now = Instant::now();
        let value = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let current = if entry.is_expired(now) {
                    entry.expires_at = None;
                    0
                } else {
                    parse_counter(key, &entry.value)?
                };
                let next = apply_delta(key, current, delta)?;
                entry.value = next.to_string().into_bytes();
                next
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(delta.to_string().as_bytes(), None, now));
                delta
            }
        };
        self.enforce_capacity();
        Ok(value)
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn forget_if(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, entry| !entry.is_expired(now) && entry.value == expected)
            .is_some())
    }

    async fn flush(&self) -> CacheResult<()> {
        self.entries.clear();
        debug!("Cache FLUSH (memory)");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
