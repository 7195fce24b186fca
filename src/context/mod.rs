// SPDX-License-Identifier: MIT
//! Session-scoped access context.
//!
//! Owns the merged access map and composes the route optimizer, bulk
//! resolver, and caches. Three states:
//!
//! ```text
//! Unauthenticated ──(auth settled, user present)──► Resolving ──► Ready
//!        ▲                                                          │
//!        └───────────────────(sign_out)─────────────────────────────┘
//! ```
//!
//! - **Unauthenticated**: no checks run; `is_auth_ready()` is false.
//! - **Resolving**: bulk fetch in flight; `is_loading()` is true.
//! - **Ready**: map populated — reached on success OR failure (the error is
//!   recorded; the context is never stuck in Resolving).
//!
//! Check methods are synchronous and infallible: consumers always get a
//! conservative boolean, errors surface only as a snapshot field. Mutation
//! happens in the async lifecycle methods; no lock is held across an await.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{set_signature, AccessCache};
use crate::config::GateConfig;
use crate::error::GateError;
use crate::metrics::{GateMetrics, PerformanceMetrics};
use crate::oracle::{AccessMap, AccessOracle};
use crate::quota::QuotaTracker;
use crate::resolver::BulkResolver;
use crate::routes::{features_for_route, is_public_route};

/// The context's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unauthenticated,
    Resolving,
    Ready,
}

/// Referentially-stable view of the context, for consumers that diff by
/// identity. The same `Arc` is returned until the underlying state actually
/// changes (access map, state, or error — per-check counters alone do not
/// invalidate it).
#[derive(Clone)]
pub struct ContextSnapshot {
    pub state: GateState,
    pub access: AccessMap,
    pub error: Option<Arc<GateError>>,
    pub metrics: PerformanceMetrics,
    /// Set by the fallback boundary in degraded mode: every check answers
    /// `true` regardless of the map.
    pub fail_open: bool,
}

impl ContextSnapshot {
    pub fn is_loading(&self) -> bool {
        self.state == GateState::Resolving
    }

    pub fn is_auth_ready(&self) -> bool {
        self.state != GateState::Unauthenticated
    }

    /// Looked-up boolean, `false` for unresolved names. Never panics.
    pub fn has_access(&self, feature: &str) -> bool {
        if self.fail_open {
            return true;
        }
        if self.state == GateState::Resolving && self.access.is_empty() {
            // Conservative default while the first fetch is in flight —
            // avoids render-then-hide flicker.
            return false;
        }
        *self.access.get(feature).unwrap_or(&false)
    }

    /// Short-circuit OR over [`Self::has_access`]. `can_use_any(&[]) == false`.
    pub fn can_use_any(&self, features: &[String]) -> bool {
        features.iter().any(|f| self.has_access(f))
    }

    /// Short-circuit AND over [`Self::has_access`]. `can_use_all(&[]) == true`
    /// (vacuous truth).
    pub fn can_use_all(&self, features: &[String]) -> bool {
        features.iter().all(|f| self.has_access(f))
    }
}

struct ContextInner {
    state: GateState,
    user_id: Option<String>,
    access: AccessMap,
    error: Option<Arc<GateError>>,
    /// Latest issued sequence per feature-set signature. A completed
    /// resolution applies only while it is still the newest for its own
    /// set; resolutions for other sets never supersede it.
    inflight: HashMap<String, u64>,
    /// Monotonic source for `inflight` sequence numbers.
    issue_seq: u64,
    /// Bumped on every visible change; keys the memoized snapshot.
    version: u64,
    memo: Option<(u64, Arc<ContextSnapshot>)>,
}

impl ContextInner {
    fn touch(&mut self) {
        self.version += 1;
    }
}

/// Session-scoped entitlement context.
///
/// Cheaply cloneable — clones share all state via `Arc`.
#[derive(Clone)]
pub struct AccessContext {
    inner: Arc<RwLock<ContextInner>>,
    resolver: BulkResolver,
    quota: QuotaTracker,
    config: Arc<GateConfig>,
    metrics: GateMetrics,
}

impl AccessContext {
    pub fn new(oracle: Arc<dyn AccessOracle>, config: Arc<GateConfig>) -> Self {
        let metrics = GateMetrics::new();
        let cache = AccessCache::new(config.access_ttl);
        let resolver = BulkResolver::new(
            Arc::clone(&oracle),
            cache,
            Arc::clone(&config),
            metrics.clone(),
        );
        let quota = QuotaTracker::new(oracle, config.quota_ttl);
        Self {
            inner: Arc::new(RwLock::new(ContextInner {
                state: GateState::Unauthenticated,
                user_id: None,
                access: AccessMap::new(),
                error: None,
                inflight: HashMap::new(),
                issue_seq: 0,
                version: 0,
                memo: None,
            })),
            resolver,
            quota,
            config,
            metrics,
        }
    }

    /// The parallel numeric-quota tracker (shares the session lifecycle).
    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    // ── Checks (sync, infallible) ────────────────────────────────────────

    pub fn state(&self) -> GateState {
        self.inner.read().expect("context lock poisoned").state
    }

    pub fn is_loading(&self) -> bool {
        self.state() == GateState::Resolving
    }

    pub fn is_auth_ready(&self) -> bool {
        self.state() != GateState::Unauthenticated
    }

    pub fn error(&self) -> Option<Arc<GateError>> {
        self.inner
            .read()
            .expect("context lock poisoned")
            .error
            .clone()
    }

    /// Boolean entitlement for `feature`.
    ///
    /// `false` while the first resolution is in flight and for any name the
    /// map does not hold. Never panics, never errors.
    pub fn has_access(&self, feature: &str) -> bool {
        self.metrics.record_check();
        let inner = self.inner.read().expect("context lock poisoned");
        if inner.state == GateState::Resolving && inner.access.is_empty() {
            return false;
        }
        *inner.access.get(feature).unwrap_or(&false)
    }

    /// `true` when any of `features` is granted. `can_use_any(&[]) == false`.
    pub fn can_use_any(&self, features: &[String]) -> bool {
        features.iter().any(|f| self.has_access(f))
    }

    /// `true` when every one of `features` is granted. `can_use_all(&[]) ==
    /// true` (vacuous truth).
    pub fn can_use_all(&self, features: &[String]) -> bool {
        features.iter().all(|f| self.has_access(f))
    }

    /// Memoized snapshot — the same `Arc` until state actually changes.
    pub fn snapshot(&self) -> Arc<ContextSnapshot> {
        {
            let inner = self.inner.read().expect("context lock poisoned");
            if let Some((version, snap)) = &inner.memo {
                if *version == inner.version {
                    return Arc::clone(snap);
                }
            }
        }
        let mut inner = self.inner.write().expect("context lock poisoned");
        let snap = Arc::new(ContextSnapshot {
            state: inner.state,
            access: inner.access.clone(),
            error: inner.error.clone(),
            metrics: self.metrics.snapshot(),
            fail_open: false,
        });
        inner.memo = Some((inner.version, Arc::clone(&snap)));
        snap
    }

    // ── Lifecycle (async) ────────────────────────────────────────────────

    /// Auth settled with a user present: resolve the essential feature set.
    ///
    /// Transitions Unauthenticated → Resolving immediately, then → Ready
    /// when the resolution lands (successfully or not).
    pub async fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        let essentials = self.config.essential_features.clone();
        let signature = set_signature(&essentials);
        let seq;
        {
            let mut inner = self.inner.write().expect("context lock poisoned");
            inner.user_id = Some(user_id.clone());
            inner.state = GateState::Resolving;
            inner.access.clear();
            inner.error = None;
            // Anything still in flight belongs to the previous session.
            inner.inflight.clear();
            inner.issue_seq += 1;
            seq = inner.issue_seq;
            inner.inflight.insert(signature.clone(), seq);
            inner.touch();
        }
        info!(user_id = %user_id, "sign-in — resolving essential features");
        self.resolve_and_apply(&user_id, &essentials, &signature, seq)
            .await;
    }

    /// Route change. Public routes and unauthenticated sessions resolve
    /// nothing; otherwise the route's feature set goes through the bulk
    /// resolver and the result merges into the map. A newer resolution of
    /// the same feature set supersedes this one's in-flight result;
    /// resolutions of other sets do not.
    pub async fn navigate(&self, route: &str) {
        if is_public_route(route, &self.config.public_routes) {
            debug!(route, "public route — skipping resolution");
            return;
        }
        let features = features_for_route(
            route,
            None,
            &self.config.essential_features,
            &self.config.routes,
        );
        let signature = set_signature(&features);
        let (user_id, seq) = {
            let mut inner = self.inner.write().expect("context lock poisoned");
            let Some(user_id) = inner.user_id.clone() else {
                debug!(route, "not authenticated — skipping resolution");
                return;
            };
            inner.issue_seq += 1;
            let seq = inner.issue_seq;
            inner.inflight.insert(signature.clone(), seq);
            (user_id, seq)
        };
        self.resolve_and_apply(&user_id, &features, &signature, seq)
            .await;
    }

    /// Advisory preload: resolve `features` in the background. Never blocks
    /// and never surfaces an error to the caller.
    pub fn preload_features(&self, features: Vec<String>) {
        let ctx = self.clone();
        tokio::spawn(async move {
            let signature = set_signature(&features);
            let (user_id, seq) = {
                let mut inner = ctx.inner.write().expect("context lock poisoned");
                let Some(user_id) = inner.user_id.clone() else {
                    return;
                };
                inner.issue_seq += 1;
                let seq = inner.issue_seq;
                inner.inflight.insert(signature.clone(), seq);
                (user_id, seq)
            };
            ctx.resolve_and_apply(&user_id, &features, &signature, seq)
                .await;
        });
    }

    /// Discard the session: caches cleared, map rebuilt on next sign-in.
    pub async fn sign_out(&self) {
        let user_id = {
            let mut inner = self.inner.write().expect("context lock poisoned");
            inner.state = GateState::Unauthenticated;
            inner.access.clear();
            inner.error = None;
            inner.inflight.clear();
            inner.touch();
            inner.user_id.take()
        };
        if let Some(user_id) = user_id {
            info!(user_id = %user_id, "sign-out — dropping session caches");
            self.resolver.cache().invalidate_user(&user_id).await;
            self.quota.invalidate_user(&user_id).await;
        }
    }

    async fn resolve_and_apply(
        &self,
        user_id: &str,
        features: &[String],
        signature: &str,
        seq: u64,
    ) {
        let resolution = self.resolver.resolve(user_id, features).await;

        let mut inner = self.inner.write().expect("context lock poisoned");
        // Superseded: a newer resolution of the same feature set was issued
        // while this one was in flight, or the session changed underneath
        // it. Results for other sets are unaffected.
        if inner.user_id.as_deref() != Some(user_id)
            || inner.inflight.get(signature) != Some(&seq)
        {
            debug!(user_id, seq, "discarding superseded resolution result");
            return;
        }
        inner.inflight.remove(signature);
        for (feature, granted) in resolution.access {
            inner.access.insert(feature, granted);
        }
        if let Some(e) = &resolution.error {
            warn!(user_id, err = %e, "resolution completed degraded");
        }
        inner.error = resolution.error;
        inner.state = GateState::Ready;
        inner.touch();
    }
}
