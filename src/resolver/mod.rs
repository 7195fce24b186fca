// SPDX-License-Identifier: MIT
//! Bulk entitlement resolution.
//!
//! One oracle round trip per distinct (user, feature set) per staleness
//! window, with a hard client-side deadline and a single fixed-delay retry.
//! When the oracle cannot answer, the dual fallback policy applies per
//! feature: names on the configured allow-list (core navigation pages) fail
//! OPEN, everything else fails CLOSED. The two branches are deliberate and
//! security-relevant — they are never collapsed into one default.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{set_signature, AccessCache};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::metrics::GateMetrics;
use crate::observability::LatencyTracker;
use crate::oracle::{AccessMap, AccessOracle};
use crate::retry::retry_fixed;

/// Outcome of one resolution: always a usable map, plus the error when the
/// map came from fallback policy instead of the oracle.
#[derive(Clone)]
pub struct Resolution {
    pub access: AccessMap,
    pub error: Option<Arc<GateError>>,
}

impl Resolution {
    fn ok(access: AccessMap) -> Self {
        Self {
            access,
            error: None,
        }
    }
}

#[derive(Clone)]
pub struct BulkResolver {
    oracle: Arc<dyn AccessOracle>,
    cache: AccessCache,
    config: Arc<GateConfig>,
    metrics: GateMetrics,
}

impl BulkResolver {
    pub fn new(
        oracle: Arc<dyn AccessOracle>,
        cache: AccessCache,
        config: Arc<GateConfig>,
        metrics: GateMetrics,
    ) -> Self {
        Self {
            oracle,
            cache,
            config,
            metrics,
        }
    }

    pub fn cache(&self) -> &AccessCache {
        &self.cache
    }

    /// Resolve entitlement for `features`, batched into a single round trip
    /// on cache miss. Never returns `Err` — failures surface in
    /// [`Resolution::error`] beside the policy-derived map.
    pub async fn resolve(&self, user_id: &str, features: &[String]) -> Resolution {
        if features.is_empty() {
            return Resolution::ok(AccessMap::new());
        }

        let signature = set_signature(features);
        if let Some(access) = self.cache.get_fresh(user_id, &signature).await {
            self.metrics.record_cache_hit();
            return Resolution::ok(access);
        }
        self.metrics.record_cache_miss();

        // Issue-time generation: a later navigation/resolution for the same
        // key takes a larger value, so this response cannot overwrite it.
        let generation = self.cache.issue_generation();
        let tracker = LatencyTracker::start("oracle.check_features");

        let retry_cfg = self.config.retry_config();
        let deadline = self.config.request_timeout;
        let result = retry_fixed(&retry_cfg, || async {
            match tokio::time::timeout(deadline, self.oracle.check_features(user_id, features))
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(GateError::Timeout {
                    elapsed_ms: deadline.as_millis() as u64,
                }),
            }
        })
        .await;

        match result {
            Ok(access) => {
                self.metrics.record_load(tracker.finish());
                self.cache
                    .store(user_id, &signature, generation, access.clone())
                    .await;
                debug!(
                    user_id,
                    features = features.len(),
                    granted = access.values().filter(|v| **v).count(),
                    "access resolved"
                );
                Resolution::ok(access)
            }
            Err(e) => {
                warn!(user_id, err = %e, "access resolution failed — applying fallback policy");
                // The allow-list only covers failures to reach an
                // authoritative answer; anything else denies across the set.
                let access = if e.is_transport() {
                    self.fallback_map(features)
                } else {
                    features.iter().map(|f| (f.clone(), false)).collect()
                };
                // Fallback grants are not cached: the next window retries the
                // oracle instead of trusting the degraded answer for 5 minutes.
                Resolution {
                    access,
                    error: Some(Arc::new(e)),
                }
            }
        }
    }

    /// Per-feature fallback: allow-listed basics open, the rest closed.
    fn fallback_map(&self, features: &[String]) -> AccessMap {
        features
            .iter()
            .map(|f| {
                let open = self.config.fails_open(f);
                if open {
                    warn!(feature = %f, "failing open (basic feature)");
                }
                (f.clone(), open)
            })
            .collect()
    }
}
