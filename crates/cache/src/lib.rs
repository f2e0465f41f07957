//! Two-tier cache for derived reads.
//!
//! Tier 1 is an in-process [`moka`] cache (bounded, TTL, LRU eviction) that
//! is always available. Tier 2 is a distributed store behind the
//! [`RemoteStore`] trait — Redis in production, [`MemoryStore`] for
//! single-instance deployments and tests — guarded by a circuit breaker so
//! a failing remote degrades every operation to a Tier-1-only path instead
//! of failing callers.
//!
//! Cache content is advisory: nothing in the consuming application may
//! depend on an entry being present or fresh.

pub mod breaker;
pub mod cache;
mod entry;
pub mod remote;
pub mod stats;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use cache::{CacheConfig, CacheError, CacheOptions, TieredCache};
pub use remote::{MemoryStore, RedisStore, RemoteError, RemoteStore};
pub use stats::StatsSnapshot;
