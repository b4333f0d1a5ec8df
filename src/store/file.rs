//! Filesystem store
//!
//! One file per key, named by the SHA-256 of the key and sharded into
//! two-character subdirectories. Each file starts with a header line holding
//! the expiry as unix milliseconds (`0` for forever), followed by the payload.
//!
//! `add`, `increment` and `forget_if` run under one in-process write lock.
//! `add` publishes its entry with a hard link, which the OS refuses when the
//! target exists. Counters are only serialized inside this process, so the
//! store reports no tag support: another process writing the same directory
//! could lose updates.

use super::{apply_delta, parse_counter, Store};
use crate::error::CacheResult;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct FileEntry {
    expires_at_ms: Option<i64>,
    value: Vec<u8>,
}

impl FileEntry {
    fn new(value: &[u8], ttl: Option<Duration>) -> Self {
        let expires_at_ms = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now_ms().saturating_add(ttl_ms.max(1))
        });
        Self {
            expires_at_ms,
            value: value.to_vec(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms())
    }

    fn encode(&self) -> Vec<u8> {
        let header = self.expires_at_ms.unwrap_or(0).to_string();
        let mut bytes = Vec::with_capacity(header.len() + 1 + self.value.len());
        bytes.extend_from_slice(header.as_bytes());
        bytes.push(b'\n');
        bytes.extend_from_slice(&self.value);
        bytes
    }

    /// `None` for a truncated or half-written file, which reads as a miss
    fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.iter().position(|b| *b == b'\n')?;
        let header = std::str::from_utf8(&bytes[..split]).ok()?;
        let expires_at_ms = match header.parse::<i64>().ok()? {
            0 => None,
            at => Some(at),
        };
        Some(Self {
            expires_at_ms,
            value: bytes[split + 1..].to_vec(),
        })
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Store that keeps each entry in its own file under `directory`
#[derive(Debug)]
pub struct FileStore {
    directory: PathBuf,
    /// Serializes read-modify-write operations on this store
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        self.directory.join(&hash[..2]).join(hash)
    }

    async fn read_entry(&self, path: &Path) -> CacheResult<Option<FileEntry>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(FileEntry::decode(&bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, path: &Path) -> CacheResult<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temporary file and rename so readers never see a partial entry
    async fn write_entry(&self, path: &Path, entry: &FileEntry) -> CacheResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, entry.encode()).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Publish `entry` at `path` only if nothing is there yet. The entry is
    /// fully written to a temporary file first, then hard-linked into place.
    async fn link_new_entry(&self, path: &Path, entry: &FileEntry) -> CacheResult<bool> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, entry.encode()).await?;
        let linked = fs::hard_link(&tmp, path).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match self.read_entry(&path).await? {
            Some(entry) if entry.is_expired() => {
                self.remove_file(&path).await?;
                debug!(key = key, "Cache EXPIRED (file)");
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        let path = self.path_for(key);
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            self.remove_file(&path).await?;
            return Ok(());
        }
        self.write_entry(&path, &FileEntry::new(value, ttl)).await
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Ok(false);
        }

        // Expired-entry takeover is read, remove, create: hold the lock for all three
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(key);
        if let Some(existing) = self.read_entry(&path).await? {
            if !existing.is_expired() {
                return Ok(false);
            }
            self.remove_file(&path).await?;
        }
        self.link_new_entry(&path, &FileEntry::new(value, ttl)).await
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(key);

        let (current, expires_at_ms) = match self.read_entry(&path).await? {
            Some(entry) if !entry.is_expired() => {
                (parse_counter(key, &entry.value)?, entry.expires_at_ms)
            }
            _ => (0, None),
        };
        let next = apply_delta(key, current, delta)?;

        let entry = FileEntry {
            expires_at_ms,
            value: next.to_string().into_bytes(),
        };
        self.write_entry(&path, &entry).await?;
        Ok(next)
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        let path = self.path_for(key);
        let live = matches!(self.read_entry(&path).await?, Some(entry) if !entry.is_expired());
        let removed = self.remove_file(&path).await?;
        Ok(live && removed)
    }

    async fn forget_if(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(key);
        match self.read_entry(&path).await? {
            Some(entry) if !entry.is_expired() && entry.value == expected => {
                self.remove_file(&path).await
            }
            _ => Ok(false),
        }
    }

    async fn flush(&self) -> CacheResult<()> {
        match fs::remove_dir_all(&self.directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.directory).await?;
        debug!(directory = %self.directory.display(), "Cache FLUSH (file)");
        Ok(())
    }

    fn supports_tags(&self) -> bool {
        false
    }

    async fn health_check(&self) -> CacheResult<bool> {
        fs::create_dir_all(&self.directory).await?;
        Ok(fs::metadata(&self.directory).await?.is_dir())
    }

    fn provider_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("cache"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_file_put_and_get() {
        let (_dir, store) = store();
        store.put("k", b"hello", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_payload_may_contain_newlines() {
        let (_dir, store) = store();
        store.forever("k", b"line one\nline two").await.unwrap();
        assert_eq!(
            store.get("k").await.unwrap(),
            Some(b"line one\nline two".to_vec())
        );
    }

    #[tokio::test]
    async fn test_file_entry_expires() {
        let (_dir, store) = store();
        store.put("k", b"v", Some(Duration::from_millis(30))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.path_for("k").exists());
    }

    #[tokio::test]
    async fn test_file_add_only_when_absent() {
        let (_dir, store) = store();
        assert!(store.add("k", b"1", None).await.unwrap());
        assert!(!store.add("k", b"2", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_file_increment_and_decrement() {
        let (_dir, store) = store();
        assert_eq!(store.increment("n", 3).await.unwrap(), 3);
        assert_eq!(store.increment("n", 2).await.unwrap(), 5);
        assert_eq!(store.decrement("n", 10).await.unwrap(), -5);
    }

    #[tokio::test]
    async fn test_file_forget_and_flush() {
        let (_dir, store) = store();
        store.forever("a", b"1").await.unwrap();
        store.forever("b", b"2").await.unwrap();

        assert!(store.forget("a").await.unwrap());
        assert!(!store.forget("a").await.unwrap());

        store.flush().await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), None);
        assert!(store.directory().is_dir());
    }

    #[tokio::test]
    async fn test_file_store_rejects_tags() {
        let (_dir, store) = store();
        assert!(!store.supports_tags());
        assert_eq!(store.provider_name(), "file");
        assert!(store.health_check().await.unwrap());
    }

    #[test]
    fn test_file_entry_decode_rejects_garbage() {
        assert!(FileEntry::decode(b"no header").is_none());
        assert!(FileEntry::decode(b"abc\npayload").is_none());
        let entry = FileEntry::decode(b"0\npayload").unwrap();
        assert!(entry.expires_at_ms.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_add_takeover_of_expired_entry_has_one_winner() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);

        for round in 0..50 {
            store
                .put("lock", b"stale", Some(Duration::from_millis(1)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(3)).await;

            let mut handles = Vec::new();
            for owner in 0..8u8 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .add("lock", &[owner], Some(Duration::from_secs(60)))
                        .await
                        .unwrap()
                }));
            }
            let mut winners = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "round {round} had {winners} winners");
        }
    }

    #[tokio::test]
    async fn test_file_forget_if_checks_owner() {
        let (_dir, store) = store();
        assert!(store.add("lock", b"owner-a", None).await.unwrap());
        assert!(!store.forget_if("lock", b"owner-b").await.unwrap());
        assert!(store.forget_if("lock", b"owner-a").await.unwrap());
        assert!(store.add("lock", b"owner-b", None).await.unwrap());
    }
}
