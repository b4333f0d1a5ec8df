//! Redis store
//!
//! Uses `redis::aio::ConnectionManager` for async multiplexed connections.
//! Requires the `store-redis` feature flag. Every command is bounded by the
//! configured timeout; an elapsed timeout surfaces as `StoreUnavailable`.

use super::Store;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const RELEASE_IF_OWNER: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Redis-backed store using ConnectionManager
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: redis::aio::ConnectionManager,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection_manager", &"ConnectionManager")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis, failing with `StoreUnavailable` if the server cannot be reached
    pub async fn connect(url: &str, timeout: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            CacheError::Configuration(format!("Invalid Redis URL {}: {e}", redact_url(url)))
        })?;

        let connection_manager =
            tokio::time::timeout(timeout, redis::aio::ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    CacheError::StoreUnavailable(format!(
                        "Timed out connecting to Redis at {}",
                        redact_url(url)
                    ))
                })?
                .map_err(|e| {
                    CacheError::StoreUnavailable(format!("Failed to connect to Redis: {e}"))
                })?;

        debug!(url = %redact_url(url), "Redis cache store connected");

        Ok(Self {
            connection_manager,
            timeout,
        })
    }

    async fn run<T, F>(&self, command: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_redis_error(command, e)),
            Err(_) => Err(CacheError::StoreUnavailable(format!(
                "Redis {command} timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

fn map_redis_error(command: &str, e: redis::RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        CacheError::StoreUnavailable(format!("Redis {command} failed: {e}"))
    } else {
        CacheError::Backend(format!("Redis {command} failed: {e}"))
    }
}

/// Redis rejects a `PX` whose deadline overflows its clock; such TTLs are stored without expiry
const MAX_PX_MILLIS: u64 = i64::MAX as u64 / 2;

fn ttl_millis(ttl: Duration) -> Option<u64> {
    u64::try_from(ttl.as_millis())
        .ok()
        .filter(|ms| *ms <= MAX_PX_MILLIS)
        .map(|ms| ms.max(1))
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection_manager.clone();
        let result: Option<Vec<u8>> = self
            .run("GET", redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;

        if result.is_some() {
            debug!(key = key, "Cache HIT (redis)");
        } else {
            debug!(key = key, "Cache MISS (redis)");
        }
        Ok(result)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            self.forget(key).await?;
            return Ok(());
        }

        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ms) = ttl.and_then(ttl_millis) {
            cmd.arg("PX").arg(ms);
        }
        self.run("SET", cmd.query_async::<()>(&mut conn)).await?;

        debug!(key = key, ttl = ?ttl, "Cache SET (redis)");
        Ok(())
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Ok(false);
        }

        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ms) = ttl.and_then(ttl_millis) {
            cmd.arg("PX").arg(ms);
        }
        let reply: Option<String> = self.run("SET NX", cmd.query_async(&mut conn)).await?;
        Ok(reply.is_some())
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.connection_manager.clone();
        let result = tokio::time::timeout(
            self.timeout,
            redis::cmd("INCRBY")
                .arg(key)
                .arg(delta)
                .query_async::<i64>(&mut conn),
        )
        .await;

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if e.kind() == redis::ErrorKind::ResponseError => {
                Err(CacheError::non_numeric(key))
            }
            Ok(Err(e)) => Err(map_redis_error("INCRBY", e)),
            Err(_) => Err(CacheError::StoreUnavailable(format!(
                "Redis INCRBY timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection_manager.clone();
        let removed: u64 = self
            .run("DEL", redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        debug!(key = key, "Cache DEL (redis)");
        Ok(removed > 0)
    }

    async fn forget_if(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let mut conn = self.connection_manager.clone();
        let script = redis::Script::new(RELEASE_IF_OWNER);
        let mut invocation = script.key(key);
        invocation.arg(expected);
        let removed: u64 = self
            .run("EVALSHA", invocation.invoke_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn flush(&self) -> CacheResult<()> {
        let mut conn = self.connection_manager.clone();
        self.run("FLUSHDB", redis::cmd("FLUSHDB").query_async::<()>(&mut conn))
            .await?;
        debug!("Cache FLUSH (redis)");
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.connection_manager.clone();
        let pong: String = self
            .run("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(pong == "PONG")
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

/// Redact credentials from a Redis URL for logging
fn redact_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let prefix = &url[..=colon_pos];
            let suffix = &url[at_pos..];
            return format!("{prefix}***{suffix}");
        }
    }
    url.to_string()
}
