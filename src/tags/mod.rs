//! # Tag-based invalidation
//!
//! Backends have no notion of tags, so tags are implemented as versioned
//! namespaces. Every tag has a version token stored under
//! `tag_version:<name>`. A tagged key is stored under a hash of the current
//! versions of all its tags plus the caller's key:
//!
//! ```text
//! tags([users, posts]).put("feed", ..)
//!   tag_version:posts -> 0190c5...   ┐
//!   tag_version:users -> 0190c4...   ├─ sha256 ─> tagged:9f2c...  (entry)
//!   "feed"                           ┘
//! ```
//!
//! Flushing a tag replaces its version. Every key derived from the old
//! version becomes unreachable and is left for the backend to reclaim; no
//! per-tag key lists are ever kept or enumerated.
//!
//! Versions are UUIDv7 tokens: time ordered and never reused, so a flushed
//! namespace can never be derived again, not even if the version entry
//! itself is evicted and recreated.

pub mod tagged;

pub use tagged::TaggedCache;

use crate::error::{CacheError, CacheResult};
use crate::store::Store;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Reserved key prefix for tag version entries
pub const TAG_VERSION_PREFIX: &str = "tag_version:";

/// Reserved key prefix for tag-namespaced entries
pub const TAGGED_KEY_PREFIX: &str = "tagged:";

/// A tag and its current version token
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TagVersion {
    pub tag: String,
    pub version: String,
}

/// The tags one logical operation runs under
#[derive(Debug, Clone)]
pub struct TagSet {
    store: Arc<dyn Store>,
    names: Vec<String>,
}

fn new_version() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

fn tag_key(name: &str) -> String {
    format!("{TAG_VERSION_PREFIX}{name}")
}

impl TagSet {
    /// Fails with `TagUnsupported` on stores without cross-process atomic primitives
    pub fn new<I, S>(store: Arc<dyn Store>, names: I) -> CacheResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !store.supports_tags() {
            return Err(CacheError::TagUnsupported {
                driver: store.provider_name(),
            });
        }
        Ok(Self {
            store,
            names: names.into_iter().map(Into::into).collect(),
        })
    }

    /// Tag names in the order the caller supplied them
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Sorted, de-duplicated names; the basis of key derivation
    fn canonical_names(&self) -> BTreeSet<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    /// Current version of every tag, creating missing versions
    pub async fn resolve(&self) -> CacheResult<Vec<TagVersion>> {
        let mut versions = Vec::with_capacity(self.names.len());
        for name in self.canonical_names() {
            versions.push(TagVersion {
                tag: name.to_string(),
                version: self.version_of(name).await?,
            });
        }
        Ok(versions)
    }

    async fn version_of(&self, name: &str) -> CacheResult<String> {
        let key = tag_key(name);
        if let Some(raw) = self.store.get(&key).await? {
            return Ok(String::from_utf8_lossy(&raw).into_owned());
        }

        // First creation races are settled by add: losers adopt the winner's version
        let candidate = new_version();
        if self.store.add(&key, candidate.as_bytes(), None).await? {
            debug!(tag = name, version = %candidate, "Tag version created");
            return Ok(candidate);
        }
        match self.store.get(&key).await? {
            Some(raw) => Ok(String::from_utf8_lossy(&raw).into_owned()),
            None => Ok(candidate),
        }
    }

    /// Give every tag in the set a fresh version, orphaning all entries stored under them
    pub async fn reset(&self) -> CacheResult<Vec<TagVersion>> {
        let mut versions = Vec::with_capacity(self.names.len());
        for name in self.canonical_names() {
            let version = new_version();
            self.store.forever(&tag_key(name), version.as_bytes()).await?;
            debug!(tag = name, version = %version, "Tag flushed");
            versions.push(TagVersion {
                tag: name.to_string(),
                version,
            });
        }
        Ok(versions)
    }

    /// Human-readable namespace: `name=version` pairs joined by `|`
    pub async fn namespace(&self) -> CacheResult<String> {
        let versions = self.resolve().await?;
        Ok(versions
            .iter()
            .map(|v| format!("{}={}", v.tag, v.version))
            .collect::<Vec<_>>()
            .join("|"))
    }

    pub async fn namespaced_key(&self, key: &str) -> CacheResult<String> {
        let versions = self.resolve().await?;
        Ok(derive_key(&versions, key))
    }
}

/// Deterministic storage key for `key` under the given tag versions
///
/// Versions are expected in tag-name order, as `resolve` returns them.
pub fn derive_key(versions: &[TagVersion], key: &str) -> String {
    let mut hasher = Sha256::new();
    for version in versions {
        hasher.update(version.tag.as_bytes());
        hasher.update(b"=");
        hasher.update(version.version.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"\n");
    hasher.update(key.as_bytes());
    format!("{TAGGED_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}
