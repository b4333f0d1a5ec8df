//! PostgreSQL store
//!
//! Entries live in a single table keyed by cache key. Requires the
//! `store-postgres` feature flag. `add` and `increment` are single
//! `INSERT ... ON CONFLICT` statements, so Postgres row locking makes them
//! atomic across every process sharing the table.

use super::Store;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::debug;

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct DatabaseStore {
    pool: PgPool,
    table: String,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiration_for(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms().saturating_add(ttl_ms.max(1))
    })
}

/// SQLSTATEs raised when the stored value cannot be read as a `BIGINT`:
/// invalid_text_representation, character_not_in_repertoire (bytes that are
/// not UTF-8) and numeric_value_out_of_range
fn is_non_numeric_state(code: &str) -> bool {
    matches!(code, "22P02" | "22021" | "22003")
}

fn validate_table_name(table: &str) -> CacheResult<()> {
    let valid = !table.is_empty()
        && table.len() <= 63
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(CacheError::Configuration(format!(
            "Invalid cache table name '{table}'"
        )))
    }
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> CacheError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => {
            CacheError::StoreUnavailable(format!("Database {operation} failed: {e}"))
        }
        other => CacheError::Backend(format!("Database {operation} failed: {other}")),
    }
}

impl DatabaseStore {
    pub fn new(pool: PgPool, table: impl Into<String>) -> CacheResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    /// Open a pool against `url`; `timeout` bounds connection acquisition
    pub async fn connect(url: &str, table: &str, timeout: Duration) -> CacheResult<Self> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(timeout)
            .connect(url)
            .await
            .map_err(|e| CacheError::StoreUnavailable(format!("Failed to connect: {e}")))?;
        Self::new(pool, table)
    }

    /// Create the cache table if it does not exist yet
    pub async fn ensure_table(&self) -> CacheResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value BYTEA NOT NULL, expiration BIGINT)",
            self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("CREATE TABLE", e))?;
        Ok(())
    }
}

#[async_trait]
impl Store for DatabaseStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let sql = format!("SELECT value, expiration FROM {} WHERE key = $1", self.table);
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("SELECT", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expiration: Option<i64> = row.get("expiration");
        if expiration.is_some_and(|at| at <= now_ms()) {
            let sql = format!(
                "DELETE FROM {} WHERE key = $1 AND expiration <= $2",
                self.table
            );
            sqlx::query(&sql)
                .bind(key)
                .bind(now_ms())
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("DELETE", e))?;
            debug!(key = key, "Cache EXPIRED (database)");
            return Ok(None);
        }
        Ok(Some(row.get("value")))
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            self.forget(key).await?;
            return Ok(());
        }

        let sql = format!(
            "INSERT INTO {} (key, value, expiration) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expiration = EXCLUDED.expiration",
            self.table
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .bind(expiration_for(ttl))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("UPSERT", e))?;
        Ok(())
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<bool> {
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Ok(false);
        }

        // Expired rows count as absent and may be taken over
        let sql = format!(
            "INSERT INTO {t} (key, value, expiration) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expiration = EXCLUDED.expiration \
             WHERE {t}.expiration IS NOT NULL AND {t}.expiration <= $4",
            t = self.table
        );
        let result = sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .bind(expiration_for(ttl))
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("INSERT", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let sql = format!(
            "INSERT INTO {t} (key, value, expiration) VALUES ($1, convert_to($2, 'UTF8'), NULL) \
             ON CONFLICT (key) DO UPDATE SET \
               value = convert_to((CASE WHEN {t}.expiration IS NOT NULL AND {t}.expiration <= $4 THEN 0 \
                 ELSE convert_from({t}.value, 'UTF8')::BIGINT END + $3)::TEXT, 'UTF8'), \
               expiration = CASE WHEN {t}.expiration IS NOT NULL AND {t}.expiration <= $4 THEN NULL \
                 ELSE {t}.expiration END \
             RETURNING convert_from(value, 'UTF8')::BIGINT AS counter",
            t = self.table
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(delta.to_string())
            .bind(delta)
            .bind(now_ms())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let non_numeric = matches!(
                    &e,
                    sqlx::Error::Database(db) if db.code().is_some_and(|code| is_non_numeric_state(&code))
                );
                if non_numeric {
                    CacheError::non_numeric(key)
                } else {
                    map_sqlx_error("INCREMENT", e)
                }
            })?;
        Ok(row.get("counter"))
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE key = $1 RETURNING (expiration IS NULL OR expiration > $2) AS live",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .bind(now_ms())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("DELETE", e))?;
        Ok(row.is_some_and(|row| row.get::<bool, _>("live")))
    }

    async fn forget_if(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE key = $1 AND value = $2 AND (expiration IS NULL OR expiration > $3)",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(key)
            .bind(expected)
            .bind(now_ms())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("DELETE", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn flush(&self) -> CacheResult<()> {
        let sql = format!("DELETE FROM {}", self.table);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("DELETE", e))?;
        debug!(table = %self.table, "Cache FLUSH (database)");
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("PING", e))?;
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "database"
    }
}
