//! Numeric usage quotas, parallel to boolean entitlement.
//!
//! Quotas live in their own cache with a much shorter staleness window than
//! access booleans (consumption moves them constantly; plan flags rarely
//! change). Fetch failures synthesize an unlimited allow record — the same
//! fail-open rationale as the resolver's basic-feature policy. Consumption
//! is different: the server-side atomic increment is the sole authority, and
//! the metered action must not proceed before a successful response.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::GateError;
use crate::oracle::AccessOracle;

// ─── Limit ────────────────────────────────────────────────────────────────────

/// A usage ceiling. A tagged type, not a nullable numeric — "not yet loaded"
/// is the absence of a [`QuotaRecord`], never a limit value.
///
/// Wire format: JSON `null` ⇔ `Unlimited`, a number ⇔ `Finite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum Limit {
    Finite(u64),
    Unlimited,
}

impl From<Option<u64>> for Limit {
    fn from(v: Option<u64>) -> Self {
        match v {
            Some(n) => Limit::Finite(n),
            None => Limit::Unlimited,
        }
    }
}

impl From<Limit> for Option<u64> {
    fn from(l: Limit) -> Self {
        match l {
            Limit::Finite(n) => Some(n),
            Limit::Unlimited => None,
        }
    }
}

// ─── QuotaRecord ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    /// Units consumed in the current period.
    pub used: u64,
    /// Ceiling for the current period.
    pub limit: Limit,
    /// When the period rolls over and `used` resets.
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

impl QuotaRecord {
    /// Units left this period. `None` when the limit is unlimited.
    pub fn remaining(&self) -> Option<u64> {
        match self.limit {
            Limit::Finite(limit) => Some(limit.saturating_sub(self.used)),
            Limit::Unlimited => None,
        }
    }

    /// Whether another unit may be consumed.
    ///
    /// Invariant: finite limit with `used >= limit` is always `false`;
    /// unlimited is always `true` regardless of `used`.
    pub fn can_use(&self) -> bool {
        match self.limit {
            Limit::Finite(limit) => self.used < limit,
            Limit::Unlimited => true,
        }
    }

    /// The fail-open record synthesized when the backend cannot answer.
    pub fn unlimited() -> Self {
        Self {
            used: 0,
            limit: Limit::Unlimited,
            reset_at: chrono::Utc::now(),
        }
    }
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

struct CachedQuota {
    record: QuotaRecord,
    fetched_at: Instant,
}

/// Per-(user, feature) quota cache over the oracle.
///
/// Cheaply cloneable — clones share the cache via `Arc`.
#[derive(Clone)]
pub struct QuotaTracker {
    oracle: Arc<dyn AccessOracle>,
    cache: Arc<RwLock<HashMap<(String, String), CachedQuota>>>,
    ttl: Duration,
}

impl QuotaTracker {
    pub fn new(oracle: Arc<dyn AccessOracle>, ttl: Duration) -> Self {
        Self {
            oracle,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Quota for one feature. Never errors: a fetch failure yields the
    /// synthesized unlimited record (and is not cached, so the next call
    /// retries the backend).
    pub async fn quota(&self, user_id: &str, feature: &str) -> QuotaRecord {
        let key = (user_id.to_string(), feature.to_string());
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!(feature, "quota cache hit");
                    return entry.record.clone();
                }
            }
        }

        match self.oracle.quota(user_id, feature).await {
            Ok(record) => {
                self.store(key, record.clone()).await;
                record
            }
            Err(e) => {
                warn!(feature, err = %e, "quota fetch failed — treating as unlimited");
                QuotaRecord::unlimited()
            }
        }
    }

    /// Quotas for many features in one round trip. Features missing from a
    /// successful response, or the whole set on failure, read as unlimited.
    pub async fn quotas(&self, user_id: &str, features: &[String]) -> HashMap<String, QuotaRecord> {
        let mut out = HashMap::new();
        let mut missing: Vec<String> = Vec::new();

        {
            let cache = self.cache.read().await;
            for feature in features {
                let key = (user_id.to_string(), feature.clone());
                match cache.get(&key) {
                    Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                        out.insert(feature.clone(), entry.record.clone());
                    }
                    _ => missing.push(feature.clone()),
                }
            }
        }

        if missing.is_empty() {
            return out;
        }

        match self.oracle.quotas(user_id, &missing).await {
            Ok(fetched) => {
                for feature in &missing {
                    let record = fetched
                        .get(feature)
                        .cloned()
                        .unwrap_or_else(QuotaRecord::unlimited);
                    self.store((user_id.to_string(), feature.clone()), record.clone())
                        .await;
                    out.insert(feature.clone(), record);
                }
            }
            Err(e) => {
                warn!(count = missing.len(), err = %e, "bulk quota fetch failed — treating as unlimited");
                for feature in missing {
                    out.insert(feature, QuotaRecord::unlimited());
                }
            }
        }
        out
    }

    /// Consume one unit of a metered feature.
    ///
    /// The server-side increment decides; on success the authoritative
    /// post-increment record replaces the cache entry. Locally the cached
    /// counter is bumped while the call is in flight (snapshot first), and
    /// the snapshot is restored on failure — so concurrent readers see the
    /// tentative state instead of a stale count, without exceptions driving
    /// the rollback.
    pub async fn consume(&self, user_id: &str, feature: &str) -> Result<QuotaRecord, GateError> {
        let key = (user_id.to_string(), feature.to_string());

        // Snapshot-and-restore bookkeeping around the remote call.
        let snapshot = {
            let mut cache = self.cache.write().await;
            match cache.get_mut(&key) {
                Some(entry) => {
                    let before = entry.record.clone();
                    entry.record.used += 1;
                    Some(before)
                }
                None => None,
            }
        };

        match self.oracle.consume(user_id, feature).await {
            Ok(record) => {
                self.store(key, record.clone()).await;
                Ok(record)
            }
            Err(e) => {
                if let Some(before) = snapshot {
                    let mut cache = self.cache.write().await;
                    if let Some(entry) = cache.get_mut(&key) {
                        entry.record = before;
                    }
                }
                warn!(feature, err = %e, "quota consume failed — rolled back tentative count");
                Err(e)
            }
        }
    }

    /// Drop every cached record for `user_id`.
    pub async fn invalidate_user(&self, user_id: &str) {
        let mut cache = self.cache.write().await;
        cache.retain(|(u, _), _| u != user_id);
    }

    /// Drop the whole cache.
    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    async fn store(&self, key: (String, String), record: QuotaRecord) {
        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CachedQuota {
                record,
                fetched_at: Instant::now(),
            },
        );
    }
}
