mod common;

use cachet_core::{CacheError, FileStore, LockOptions, PrefixedStore, Repository, Store};
use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_store_contract_memory() {
    assert_store_contract(memory_store()).await;
}

#[tokio::test]
async fn test_store_contract_file() {
    let dir = tempfile::TempDir::new().unwrap();
    assert_store_contract(Arc::new(FileStore::new(dir.path()))).await;
}

#[tokio::test]
async fn test_store_contract_prefixed() {
    assert_store_contract(Arc::new(PrefixedStore::new(memory_store(), "app"))).await;
}

#[tokio::test]
async fn test_never_written_keys_yield_default() {
    let cache = memory_repository();
    for key in ["a", "user:1", "deeply:nested:key"] {
        assert_eq!(assert_ok!(cache.get_or(key, -1i64).await), -1);
        assert!(!assert_ok!(cache.has(key).await));
    }
}

#[tokio::test(start_paused = true)]
async fn test_put_is_visible_until_ttl_elapses() {
    let cache = memory_repository();
    cache
        .put("session", &"token", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(
        cache.get_or("session", String::new()).await.unwrap(),
        "token"
    );

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(cache.has("session").await.unwrap());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(
        cache.get_or("session", "default".to_string()).await.unwrap(),
        "default"
    );
}

#[tokio::test]
async fn test_add_only_first_wins() {
    let cache = memory_repository();
    assert!(cache.add("k", &"v1", Duration::from_secs(60)).await.unwrap());
    assert!(!cache.add("k", &"v2", Duration::from_secs(60)).await.unwrap());
    assert_eq!(cache.get::<String>("k").await.unwrap().as_deref(), Some("v1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_lose_no_updates() {
    let cache = memory_repository();
    assert_eq!(cache.increment("hits", 10).await.unwrap(), 10);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..250 {
                cache.increment("hits", 1).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.get::<i64>("hits").await.unwrap(), Some(10 + 8 * 250));
}

#[tokio::test]
async fn test_increment_on_text_is_rejected() {
    let cache = memory_repository();
    cache.forever("name", &"alice").await.unwrap();
    let err = assert_err!(cache.increment("name", 1).await);
    assert!(matches!(err, CacheError::NonNumericValue { key } if key == "name"));
}

#[tokio::test]
async fn test_pull_returns_value_once() {
    let cache = memory_repository();
    cache.forever("token", &42u32).await.unwrap();

    assert_eq!(cache.pull_or("token", 0u32).await.unwrap(), 42);
    assert_eq!(cache.pull_or("token", 0u32).await.unwrap(), 0);
    assert!(cache.missing("token").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pulls_hand_out_value_once() {
    let cache = memory_repository();
    cache.forever("ticket", &"only-one").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.pull::<String>("ticket").await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remember_computes_once_per_concurrent_batch() {
    let cache = memory_repository();
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(16));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let calls = calls.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            cache
                .remember("report", Duration::from_secs(60), || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    "expensive".to_string()
                })
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "expensive");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        cache.get::<String>("report").await.unwrap().as_deref(),
        Some("expensive")
    );
    assert_eq!(cache.store().get("lock:report").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_remember_releases_lock() {
    let cache = memory_repository();

    let task = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .remember("slow", Duration::from_secs(60), || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    0u8
                })
                .await
        })
    };

    // Wait for the computation to take the lock
    let store = cache.store().clone();
    for _ in 0..100 {
        if store.get("lock:slow").await.unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(store.get("lock:slow").await.unwrap().is_some());

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let mut released = false;
    for _ in 0..100 {
        if store.get("lock:slow").await.unwrap().is_none() {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(released, "abandoned lock should be released before its TTL");
}

#[tokio::test(start_paused = true)]
async fn test_stale_lock_expires_and_waiter_recovers() {
    let cache = memory_repository().with_stampede_guard(LockOptions {
        lock_ttl: Duration::from_millis(300),
        wait_timeout: Duration::from_secs(5),
        ..LockOptions::default()
    });

    // A crashed owner: the lock is never released, only expires
    cache
        .store()
        .add("lock:job", b"crashed-owner", Some(Duration::from_millis(300)))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let value: u32 = cache
        .remember("job", Duration::from_secs(60), || async { 5 })
        .await
        .unwrap();
    assert_eq!(value, 5);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_events_do_not_affect_results() {
    let cache = memory_repository();
    let seen = record_events(&cache);
    cache
        .events()
        .listen(|_: &cachet_core::CacheEvent| -> Result<(), cachet_core::ListenerError> {
            panic!("misbehaving listener")
        });

    cache.put("k", &1u8, Duration::from_secs(5)).await.unwrap();
    assert_eq!(cache.get::<u8>("k").await.unwrap(), Some(1));
    assert!(cache.forget("k").await.unwrap());

    assert_eq!(
        *seen.lock(),
        vec!["cache.written:k", "cache.hit:k", "cache.deleted:k"]
    );
    assert_eq!(cache.events().failure_count(), 3);
}

#[tokio::test]
async fn test_global_flush_empties_every_partition() {
    let backend = memory_store();
    let repositories = partitioned_repositories(&backend, &["a", "b"]);
    let (a, b) = (&repositories[0], &repositories[1]);

    a.forever("shared-name", &"from-a").await.unwrap();
    b.forever("shared-name", &"from-b").await.unwrap();
    assert_eq!(
        a.get::<String>("shared-name").await.unwrap().as_deref(),
        Some("from-a")
    );
    assert_eq!(
        b.get::<String>("shared-name").await.unwrap().as_deref(),
        Some("from-b")
    );

    a.flush().await.unwrap();

    assert!(a.missing("shared-name").await.unwrap());
    assert!(b.missing("shared-name").await.unwrap());
}

#[tokio::test]
async fn test_remember_forever_on_unguarded_repository() {
    let cache = Repository::new(memory_store()).without_stampede_guard();
    let value: Vec<u32> = cache
        .remember_forever("list", || async { vec![1, 2, 3] })
        .await
        .unwrap();
    assert_eq!(value, vec![1, 2, 3]);
    assert_eq!(cache.get::<Vec<u32>>("list").await.unwrap(), Some(vec![1, 2, 3]));
}
