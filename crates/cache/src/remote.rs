//! Distributed cache tier.
//!
//! [`RemoteStore`] is the seam between the cache and whatever backs its
//! second tier. [`RedisStore`] is the production adapter; [`MemoryStore`]
//! backs single-instance deployments and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

/// A failed operation against the distributed tier.
///
/// Carries only a rendered message: callers never branch on the cause, they
/// count the failure and fall back to the in-process tier.
#[derive(Debug, thiserror::Error)]
#[error("remote cache store error: {0}")]
pub struct RemoteError(pub String);

impl From<redis::RedisError> for RemoteError {
    fn from(err: redis::RedisError) -> Self {
        Self(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for RemoteError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self(err.to_string())
    }
}

/// Byte-oriented key/value store with TTLs and tag sets.
///
/// Implementations must expire entries no earlier than the requested TTL;
/// set keys carry a TTL so orphaned tag indexes age out on their own.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the value at `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Store `value` at `key` for `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError>;

    /// Remove the given keys. Missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> Result<(), RemoteError>;

    /// List every live key starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;

    /// Add `member` to the set at `set_key`, refreshing the set's TTL.
    async fn add_to_set(&self, set_key: &str, member: &str, ttl: Duration)
    -> Result<(), RemoteError>;

    /// Members of the set at `set_key`; empty when absent.
    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, RemoteError>;
}

/// Redis-backed [`RemoteStore`] over a connection pool.
#[derive(Debug, Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Store over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from a `redis://` connection URL.
    pub fn connect(url: &str) -> Result<Self, RemoteError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| RemoteError(err.to_string()))?;

        Ok(Self { pool })
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut conn = self.pool.get().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError> {
        let mut conn = self.pool.get().await?;
        let () = conn.set_ex(key, value, ttl_seconds(ttl)).await?;

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), RemoteError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.get().await?;
        let () = conn.del(keys).await?;

        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let mut conn = self.pool.get().await?;
        let pattern = format!("{prefix}*");

        let mut keys = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;

            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        Ok(keys)
    }

    async fn add_to_set(
        &self,
        set_key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<(), RemoteError> {
        let mut conn = self.pool.get().await?;
        let () = conn.sadd(set_key, member).await?;
        let () = conn
            .expire(set_key, i64::try_from(ttl_seconds(ttl)).unwrap_or(i64::MAX))
            .await?;

        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, RemoteError> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.smembers(set_key).await?;

        Ok(members)
    }
}

#[derive(Debug)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryInner {
    values: HashMap<String, StoredValue>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-process [`RemoteStore`] for deployments without Redis.
///
/// TTLs are enforced on read; set keys never expire, which is acceptable
/// because the store dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut inner = self.lock();

        let expired = inner
            .values
            .get(key)
            .is_some_and(|stored| stored.expires_at <= Instant::now());

        if expired {
            inner.values.remove(key);
        }

        Ok(inner.values.get(key).map(|stored| stored.bytes.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), RemoteError> {
        self.lock().values.insert(
            key.to_owned(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), RemoteError> {
        let mut inner = self.lock();

        for key in keys {
            inner.values.remove(key);
        }

        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let now = Instant::now();

        Ok(self
            .lock()
            .values
            .iter()
            .filter(|(key, stored)| key.starts_with(prefix) && stored.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn add_to_set(
        &self,
        set_key: &str,
        member: &str,
        _ttl: Duration,
    ) -> Result<(), RemoteError> {
        self.lock()
            .sets
            .entry(set_key.to_owned())
            .or_default()
            .insert(member.to_owned());

        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .lock()
            .sets
            .get(set_key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_values() -> TestResult {
        let store = MemoryStore::new();

        store.set("a:1", b"one", Duration::from_secs(60)).await?;

        assert_eq!(store.get("a:1").await?, Some(b"one".to_vec()));
        assert_eq!(store.get("a:2").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn memory_store_expires_values_on_read() -> TestResult {
        let store = MemoryStore::new();

        store.set("a:1", b"one", Duration::from_millis(5)).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(store.get("a:1").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn memory_store_lists_keys_by_prefix() -> TestResult {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        store.set("pricing:a", b"1", ttl).await?;
        store.set("pricing:b", b"2", ttl).await?;
        store.set("catalog:a", b"3", ttl).await?;

        let mut keys = store.keys_with_prefix("pricing:").await?;
        keys.sort();

        assert_eq!(keys, ["pricing:a", "pricing:b"]);

        Ok(())
    }

    #[tokio::test]
    async fn memory_store_deletes_given_keys() -> TestResult {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        store.set("a:1", b"1", ttl).await?;
        store.set("a:2", b"2", ttl).await?;

        store.delete(&["a:1".to_owned(), "missing".to_owned()]).await?;

        assert_eq!(store.get("a:1").await?, None);
        assert_eq!(store.get("a:2").await?, Some(b"2".to_vec()));

        Ok(())
    }

    #[tokio::test]
    async fn memory_store_tracks_set_membership() -> TestResult {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);

        store.add_to_set("tag:x", "key-1", ttl).await?;
        store.add_to_set("tag:x", "key-2", ttl).await?;
        store.add_to_set("tag:x", "key-1", ttl).await?;

        let mut members = store.set_members("tag:x").await?;
        members.sort();

        assert_eq!(members, ["key-1", "key-2"]);
        assert!(store.set_members("tag:y").await?.is_empty());

        Ok(())
    }
}
