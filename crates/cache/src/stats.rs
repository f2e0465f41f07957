//! Running cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;
use serde::Serialize;

/// Monotonic counters, updated lock-free on the hot path.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
    compression_saved_bytes: AtomicU64,
}

impl Counters {
    pub fn record_l1_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saved_bytes(&self, saved: u64) {
        self.compression_saved_bytes
            .fetch_add(saved, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let lookups = hits + misses;

        StatsSnapshot {
            hits,
            misses,
            l1_hits,
            l2_hits,
            errors: self.errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            compression_saved_bytes: self.compression_saved_bytes.load(Ordering::Relaxed),
            hit_rate: rate(hits, lookups),
            l1_hit_rate: rate(l1_hits, lookups),
            l2_hit_rate: rate(l2_hits, lookups),
        }
    }
}

/// Point-in-time view of the counters with derived rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Lookups answered by either tier.
    pub hits: u64,
    /// Lookups answered by neither tier.
    pub misses: u64,
    /// Lookups answered in-process.
    pub l1_hits: u64,
    /// Lookups answered by the distributed tier.
    pub l2_hits: u64,
    /// Failed distributed-tier operations.
    pub errors: u64,
    /// Tier-1 capacity evictions.
    pub evictions: u64,
    /// Bytes saved by payload compression so far.
    pub compression_saved_bytes: u64,
    /// Hits per lookup, in percent points rounded to two decimals.
    pub hit_rate: Decimal,
    /// Tier-1 hits per lookup.
    pub l1_hit_rate: Decimal,
    /// Tier-2 hits per lookup.
    pub l2_hit_rate: Decimal,
}

fn rate(part: u64, whole: u64) -> Decimal {
    if whole == 0 {
        return Decimal::ZERO;
    }

    (Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(whole)).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_derive_from_counters() {
        let counters = Counters::default();

        counters.record_l1_hit();
        counters.record_l1_hit();
        counters.record_l2_hit();
        counters.record_miss();

        let snapshot = counters.snapshot();

        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hit_rate, Decimal::from(75));
        assert_eq!(snapshot.l1_hit_rate, Decimal::from(50));
        assert_eq!(snapshot.l2_hit_rate, Decimal::from(25));
    }

    #[test]
    fn empty_counters_report_zero_rates() {
        let snapshot = Counters::default().snapshot();

        assert_eq!(snapshot.hit_rate, Decimal::ZERO);
        assert_eq!(snapshot.l1_hit_rate, Decimal::ZERO);
    }
}
