//! Tiered cache facade.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use moka::future::Cache;
use moka::notification::RemovalCause;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::entry;
use crate::remote::RemoteStore;
use crate::stats::{Counters, StatsSnapshot};

/// Cache-layer failure.
///
/// Only local concerns surface here; distributed-tier failures are absorbed
/// by the circuit breaker and reported through the stats counters.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A value could not be serialized for storage.
    #[error("failed to serialize cache payload")]
    Serialize(#[source] serde_json::Error),
    /// A stored entry could not be decoded.
    #[error("failed to decode cache payload")]
    Decode(#[source] serde_json::Error),
    /// Payload compression or decompression failed.
    #[error("failed to compress or decompress cache payload")]
    Compression(#[source] std::io::Error),
    /// An invalidation pattern did not compile.
    #[error("invalid cache key pattern")]
    Pattern(#[from] regex::Error),
}

/// Cache tuning.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Leading segment of every key, isolating this application's entries.
    pub prefix: String,
    /// Maximum number of in-process entries.
    pub l1_capacity: u64,
    /// In-process entry lifetime; kept short so cross-instance
    /// invalidations are observed quickly.
    pub l1_ttl: Duration,
    /// Distributed-tier lifetime used when a write names no TTL.
    pub default_ttl: Duration,
    /// Payloads larger than this many bytes are gzip-compressed before
    /// being written to the distributed tier.
    pub compression_threshold: usize,
    /// Circuit breaker guarding the distributed tier.
    pub breaker: BreakerConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "tariff".to_owned(),
            l1_capacity: 10_000,
            l1_ttl: Duration::from_secs(60),
            default_ttl: Duration::from_secs(300),
            compression_threshold: 1024,
            breaker: BreakerConfig::default(),
        }
    }
}

/// Per-write options.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Distributed-tier lifetime; the config default when absent.
    pub ttl: Option<Duration>,
    /// Age at which the entry counts as stale for
    /// [`get_or_load`](TieredCache::get_or_load). Stale entries are still
    /// served until their TTL expires.
    pub stale_after: Option<Duration>,
    /// Tags under which the entry is indexed for group invalidation.
    pub tags: Vec<String>,
    /// Serve a stale hit immediately and refresh it in the background,
    /// instead of blocking on the loader.
    pub stale_while_revalidate: bool,
}

#[derive(Debug)]
struct CachedPayload {
    bytes: Vec<u8>,
    stale_at_ms: Option<i64>,
}

impl CachedPayload {
    fn is_stale(&self) -> bool {
        self.stale_at_ms
            .is_some_and(|at| Timestamp::now().as_millisecond() >= at)
    }
}

/// Two-tier cache: an in-process tier that is always available, and an
/// optional distributed tier behind a circuit breaker.
///
/// Cloning is cheap; clones share both tiers, the breaker, and the stats.
#[derive(Clone)]
pub struct TieredCache {
    config: Arc<CacheConfig>,
    l1: Cache<String, Arc<CachedPayload>>,
    remote: Option<Arc<dyn RemoteStore>>,
    breaker: Arc<CircuitBreaker>,
    stats: Arc<Counters>,
}

impl fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("prefix", &self.config.prefix)
            .field("remote", &self.remote.is_some())
            .field("breaker", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

impl TieredCache {
    /// Cache with only the in-process tier.
    pub fn new(config: CacheConfig) -> Self {
        let stats = Arc::new(Counters::default());
        let eviction_stats = Arc::clone(&stats);

        let l1 = Cache::builder()
            .max_capacity(config.l1_capacity)
            .time_to_live(config.l1_ttl)
            .eviction_listener(move |_key, _value, cause| {
                if cause == RemovalCause::Size {
                    eviction_stats.record_eviction();
                }
            })
            .build();

        let breaker = Arc::new(CircuitBreaker::new(config.breaker));

        Self {
            config: Arc::new(config),
            l1,
            remote: None,
            breaker,
            stats,
        }
    }

    /// Cache with both tiers.
    pub fn with_remote(config: CacheConfig, remote: Arc<dyn RemoteStore>) -> Self {
        let mut cache = Self::new(config);
        cache.remote = Some(remote);
        cache
    }

    fn full_key(&self, namespace: &str, key: &str) -> String {
        format!("{}:{namespace}:{key}", self.config.prefix)
    }

    fn namespace_prefix(&self, namespace: &str) -> String {
        format!("{}:{namespace}:", self.config.prefix)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{tag}", self.config.prefix)
    }

    /// Look up a value. Any tier failure degrades to a miss.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let full = self.full_key(namespace, key);
        let payload = self.fetch(&full).await?;

        match serde_json::from_slice(&payload.bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                self.stats.record_error();
                tracing::warn!(key = full, error = %err, "discarding unreadable cache entry");
                self.l1.invalidate(&full).await;
                None
            }
        }
    }

    /// Store a value in both tiers.
    ///
    /// The distributed write is best-effort: when the remote is absent,
    /// the breaker is open, or the write fails, the entry still lands in
    /// the in-process tier and `Ok` is returned.
    pub async fn set<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        options: &CacheOptions,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(CacheError::Serialize)?;
        let full = self.full_key(namespace, key);

        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let stale_at_ms = options.stale_after.map(|after| {
            Timestamp::now()
                .as_millisecond()
                .saturating_add(i64::try_from(after.as_millis()).unwrap_or(i64::MAX))
        });

        self.store(&full, bytes, stale_at_ms, ttl, &options.tags)
            .await;

        Ok(())
    }

    /// Remove a single entry from both tiers.
    pub async fn delete(&self, namespace: &str, key: &str) {
        let full = self.full_key(namespace, key);

        self.l1.invalidate(&full).await;
        self.remote_delete(std::slice::from_ref(&full)).await;
    }

    /// Drop every entry this cache owns, in both tiers.
    pub async fn clear_all(&self) {
        self.l1.invalidate_all();

        let keys = self.remote_keys(&format!("{}:", self.config.prefix)).await;
        self.remote_delete(&keys).await;
    }

    /// Drop every entry in a namespace. Returns the number of distinct
    /// keys removed.
    pub async fn clear_namespace(&self, namespace: &str) -> u64 {
        let prefix = self.namespace_prefix(namespace);
        let mut removed = HashSet::new();

        for key in self.l1_keys_with_prefix(&prefix) {
            self.l1.invalidate(&key).await;
            removed.insert(key);
        }

        let remote_keys = self.remote_keys(&prefix).await;
        self.remote_delete(&remote_keys).await;
        removed.extend(remote_keys);

        removed.len() as u64
    }

    /// Drop every entry in a namespace whose bare key matches `pattern`
    /// (a regular expression). Returns the number of distinct keys removed.
    pub async fn clear_pattern(&self, namespace: &str, pattern: &str) -> Result<u64, CacheError> {
        let matcher = regex::Regex::new(pattern)?;
        let prefix = self.namespace_prefix(namespace);
        let mut removed = HashSet::new();

        for key in self.l1_keys_with_prefix(&prefix) {
            if key
                .strip_prefix(&prefix)
                .is_some_and(|bare| matcher.is_match(bare))
            {
                self.l1.invalidate(&key).await;
                removed.insert(key);
            }
        }

        let matching: Vec<String> = self
            .remote_keys(&prefix)
            .await
            .into_iter()
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .is_some_and(|bare| matcher.is_match(bare))
            })
            .collect();

        self.remote_delete(&matching).await;
        removed.extend(matching);

        Ok(removed.len() as u64)
    }

    /// Drop every entry indexed under any of the given tags. Returns the
    /// number of distinct keys removed.
    pub async fn clear_tags(&self, tags: &[String]) -> u64 {
        let mut removed = HashSet::new();
        let mut to_delete = Vec::new();

        for tag in tags {
            let tag_key = self.tag_key(tag);

            for member in self.remote_set_members(&tag_key).await {
                self.l1.invalidate(&member).await;
                removed.insert(member.clone());
                to_delete.push(member);
            }

            to_delete.push(tag_key);
        }

        self.remote_delete(&to_delete).await;

        removed.len() as u64
    }

    /// Look up a value, computing and caching it on a miss.
    ///
    /// A fresh hit is returned as-is. A stale hit is either refreshed in
    /// the background and served immediately (when
    /// [`CacheOptions::stale_while_revalidate`] is set) or recomputed
    /// inline. Loader errors are returned to the caller and nothing is
    /// cached.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        options: CacheOptions,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let full = self.full_key(namespace, key);

        if let Some(payload) = self.fetch(&full).await {
            if let Ok(value) = serde_json::from_slice::<T>(&payload.bytes) {
                if !payload.is_stale() {
                    return Ok(value);
                }

                if options.stale_while_revalidate {
                    self.refresh_in_background(namespace, key, options, loader);
                    return Ok(value);
                }
            }
        }

        let fresh = loader().await?;

        if let Err(err) = self.set(namespace, key, &fresh, &options).await {
            tracing::warn!(key = full, error = %err, "failed to cache loaded value");
        }

        Ok(fresh)
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current state of the distributed-tier circuit breaker.
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    fn refresh_in_background<T, E, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        options: CacheOptions,
        loader: F,
    ) where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let cache = self.clone();
        let namespace = namespace.to_owned();
        let key = key.to_owned();

        tokio::spawn(async move {
            match loader().await {
                Ok(fresh) => {
                    if let Err(err) = cache.set(&namespace, &key, &fresh, &options).await {
                        tracing::warn!(namespace, key, error = %err, "stale refresh could not be cached");
                    }
                }
                Err(err) => {
                    tracing::warn!(namespace, key, error = %err, "stale refresh failed, serving cached value");
                }
            }
        });
    }

    async fn fetch(&self, full: &str) -> Option<Arc<CachedPayload>> {
        if let Some(payload) = self.l1.get(full).await {
            self.stats.record_l1_hit();
            return Some(payload);
        }

        if let Some(remote) = &self.remote
            && self.breaker.allow_call()
        {
            match remote.get(full).await {
                Ok(Some(wire)) => {
                    self.breaker.record_success();

                    match entry::decode(&wire) {
                        Ok((bytes, stale_at_ms)) => {
                            let payload = Arc::new(CachedPayload { bytes, stale_at_ms });
                            self.l1.insert(full.to_owned(), Arc::clone(&payload)).await;
                            self.stats.record_l2_hit();
                            return Some(payload);
                        }
                        Err(err) => {
                            self.stats.record_error();
                            tracing::warn!(key = full, error = %err, "discarding undecodable distributed entry");
                        }
                    }
                }
                Ok(None) => self.breaker.record_success(),
                Err(err) => {
                    self.breaker.record_failure();
                    self.stats.record_error();
                    tracing::warn!(key = full, error = %err, "distributed cache read failed");
                }
            }
        }

        self.stats.record_miss();
        None
    }

    async fn store(
        &self,
        full: &str,
        bytes: Vec<u8>,
        stale_at_ms: Option<i64>,
        ttl: Duration,
        tags: &[String],
    ) {
        let payload = Arc::new(CachedPayload {
            bytes,
            stale_at_ms,
        });
        self.l1.insert(full.to_owned(), Arc::clone(&payload)).await;

        let Some(remote) = &self.remote else { return };
        if !self.breaker.allow_call() {
            return;
        }

        let encoded = match entry::encode(&payload.bytes, self.config.compression_threshold, stale_at_ms)
        {
            Ok(encoded) => encoded,
            Err(err) => {
                self.stats.record_error();
                tracing::warn!(key = full, error = %err, "failed to encode entry for distributed tier");
                return;
            }
        };
        self.stats.record_saved_bytes(encoded.bytes_saved);

        if let Err(err) = remote.set(full, &encoded.wire, ttl).await {
            self.breaker.record_failure();
            self.stats.record_error();
            tracing::warn!(key = full, error = %err, "distributed cache write failed");
            return;
        }
        self.breaker.record_success();

        for tag in tags {
            let tag_key = self.tag_key(tag);

            if let Err(err) = remote.add_to_set(&tag_key, full, ttl).await {
                self.breaker.record_failure();
                self.stats.record_error();
                tracing::warn!(key = full, tag, error = %err, "failed to index entry under tag");
                return;
            }
        }
    }

    fn l1_keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.l1
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| String::clone(&key))
            .collect()
    }

    async fn remote_keys(&self, prefix: &str) -> Vec<String> {
        let Some(remote) = &self.remote else {
            return Vec::new();
        };
        if !self.breaker.allow_call() {
            return Vec::new();
        }

        match remote.keys_with_prefix(prefix).await {
            Ok(keys) => {
                self.breaker.record_success();
                keys
            }
            Err(err) => {
                self.breaker.record_failure();
                self.stats.record_error();
                tracing::warn!(prefix, error = %err, "distributed cache key scan failed");
                Vec::new()
            }
        }
    }

    async fn remote_delete(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let Some(remote) = &self.remote else { return };
        if !self.breaker.allow_call() {
            return;
        }

        match remote.delete(keys).await {
            Ok(()) => self.breaker.record_success(),
            Err(err) => {
                self.breaker.record_failure();
                self.stats.record_error();
                tracing::warn!(count = keys.len(), error = %err, "distributed cache delete failed");
            }
        }
    }

    async fn remote_set_members(&self, set_key: &str) -> Vec<String> {
        let Some(remote) = &self.remote else {
            return Vec::new();
        };
        if !self.breaker.allow_call() {
            return Vec::new();
        }

        match remote.set_members(set_key).await {
            Ok(members) => {
                self.breaker.record_success();
                members
            }
            Err(err) => {
                self.breaker.record_failure();
                self.stats.record_error();
                tracing::warn!(set_key, error = %err, "distributed tag lookup failed");
                Vec::new()
            }
        }
    }
}
