//! Shared helpers for integration tests

#![allow(dead_code)]

pub mod strategies;

use cachet_core::{CacheEvent, ListenerError, MemoryStore, PrefixedStore, Repository, Store};
use parking_lot::Mutex;
use std::sync::Arc;

pub fn memory_store() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

pub fn memory_repository() -> Repository {
    Repository::new(memory_store())
}

/// Repositories over one physical store, partitioned by the given prefixes
pub fn partitioned_repositories(
    backend: &Arc<dyn Store>,
    prefixes: &[&str],
) -> Vec<Repository> {
    prefixes
        .iter()
        .map(|prefix| {
            let store: Arc<dyn Store> = Arc::new(PrefixedStore::new(backend.clone(), *prefix));
            Repository::new(store)
        })
        .collect()
}

/// Records `name:key` for every event the repository fires
pub fn record_events(repository: &Repository) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    repository
        .events()
        .listen(move |event: &CacheEvent| -> Result<(), ListenerError> {
            sink.lock().push(format!("{}:{}", event.name(), event.key()));
            Ok(())
        });
    seen
}

/// Store contract checks every tag-capable backend must pass
pub async fn assert_store_contract(store: Arc<dyn Store>) {
    use std::time::Duration;

    assert_eq!(store.get("absent").await.unwrap(), None);
    assert!(!store.forget("absent").await.unwrap());

    store.put("k", b"v1", Some(Duration::from_secs(60))).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(b"v1".to_vec()));

    assert!(!store.add("k", b"v2", Some(Duration::from_secs(60))).await.unwrap());
    assert_eq!(store.get("k").await.unwrap(), Some(b"v1".to_vec()));
    assert!(store.add("fresh", b"v", None).await.unwrap());

    store.put("gone", b"x", Some(Duration::ZERO)).await.unwrap();
    assert_eq!(store.get("gone").await.unwrap(), None);

    assert_eq!(store.increment("n", 4).await.unwrap(), 4);
    assert_eq!(store.decrement("n", 6).await.unwrap(), -2);

    store.forever("text", b"\"abc\"").await.unwrap();
    assert!(store.increment("text", 1).await.is_err());

    assert!(store.forget("k").await.unwrap());
    assert_eq!(store.get("k").await.unwrap(), None);

    store.flush().await.unwrap();
    assert_eq!(store.get("fresh").await.unwrap(), None);
    assert_eq!(store.get("n").await.unwrap(), None);
}
