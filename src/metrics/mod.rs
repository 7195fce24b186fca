//! Diagnostic counters for the gating layer.
//!
//! Strictly observational — nothing here ever feeds back into an access
//! decision. Counters are plain atomics so check paths stay lock-free.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time snapshot, serializable for debug panels and logs.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Duration of the most recent bulk resolution, milliseconds.
    pub load_time_ms: u64,
    /// Fraction of resolutions answered from cache, in [0, 1].
    pub cache_hit_rate: f64,
    /// When the access map was last refreshed from the oracle.
    pub last_refresh: Option<DateTime<Utc>>,
    /// Total `has_access`-style checks served this session.
    pub check_count: u64,
}

/// Shared counter store. Cheaply cloneable via `Arc`.
#[derive(Clone, Default)]
pub struct GateMetrics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    checks: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    last_load_ms: AtomicU64,
    /// Unix seconds of the last oracle refresh; negative = never.
    last_refresh_secs: AtomicI64,
}

impl GateMetrics {
    pub fn new() -> Self {
        let m = Self::default();
        m.inner.last_refresh_secs.store(-1, Ordering::Relaxed);
        m
    }

    pub fn record_check(&self) {
        self.inner.checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, elapsed_ms: u64) {
        self.inner.last_load_ms.store(elapsed_ms, Ordering::Relaxed);
        self.inner
            .last_refresh_secs
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        let hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let cache_hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        let refresh_secs = self.inner.last_refresh_secs.load(Ordering::Relaxed);
        PerformanceMetrics {
            load_time_ms: self.inner.last_load_ms.load(Ordering::Relaxed),
            cache_hit_rate,
            last_refresh: (refresh_secs >= 0)
                .then(|| Utc.timestamp_opt(refresh_secs, 0).single())
                .flatten(),
            check_count: self.inner.checks.load(Ordering::Relaxed),
        }
    }
}
