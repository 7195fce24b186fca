//! Fail-open boundary around the access layer.
//!
//! A broken entitlement layer must not brick the product. The guard runs
//! every check through `catch_unwind`; the first panic escaping the layer
//! flips the guard into a terminal **Degraded** state where every check
//! answers `true`, loading is over, auth reads ready, and the causal fault
//! is retained for diagnostics. There is no recovery path short of
//! constructing a new guard — degraded is deliberate and sticky.
//!
//! The boundary covers faults of the access layer itself, not general
//! application errors; oracle/transport failures never reach it (they are
//! handled by the resolver's fallback policy).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{error, warn};

use crate::context::{AccessContext, ContextSnapshot, GateState};
use crate::error::GateError;
use crate::metrics::PerformanceMetrics;
use crate::oracle::AccessMap;

/// Panic-isolating wrapper over [`AccessContext`].
///
/// Cheaply cloneable; clones share the degraded flag, so one caught fault
/// degrades every handle.
#[derive(Clone)]
pub struct GuardedGate {
    ctx: AccessContext,
    degraded: Arc<RwLock<Option<Arc<GateError>>>>,
}

impl GuardedGate {
    pub fn new(ctx: AccessContext) -> Self {
        Self {
            ctx,
            degraded: Arc::new(RwLock::new(None)),
        }
    }

    /// The wrapped context, for lifecycle calls (`sign_in`, `navigate`, …).
    pub fn context(&self) -> &AccessContext {
        &self.ctx
    }

    /// True once a fault has been caught. Terminal.
    pub fn is_degraded(&self) -> bool {
        self.degraded.read().expect("guard lock poisoned").is_some()
    }

    /// The retained causal fault, if degraded.
    pub fn degraded_error(&self) -> Option<Arc<GateError>> {
        self.degraded
            .read()
            .expect("guard lock poisoned")
            .clone()
    }

    fn engage(&self, payload: Box<dyn std::any::Any + Send>) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(message = %message, "access layer fault — entering degraded fail-open mode");
        let mut slot = self.degraded.write().expect("guard lock poisoned");
        // First fault wins; later faults keep the original diagnosis.
        if slot.is_none() {
            *slot = Some(Arc::new(GateError::Internal { message }));
        }
    }

    /// Run `f` against the inner context, degrading the guard on panic.
    ///
    /// This is the boundary proper: wrap any computation that descends from
    /// the access layer. `fallback` is the fail-open answer returned while
    /// degraded or when this very call faults.
    pub fn protect<T>(&self, fallback: T, f: impl FnOnce(&AccessContext) -> T) -> T {
        if self.is_degraded() {
            return fallback;
        }
        match catch_unwind(AssertUnwindSafe(|| f(&self.ctx))) {
            Ok(v) => v,
            Err(payload) => {
                self.engage(payload);
                fallback
            }
        }
    }

    // ── Check surface (fail-open while degraded) ─────────────────────────

    pub fn has_access(&self, feature: &str) -> bool {
        self.protect(true, |ctx| ctx.has_access(feature))
    }

    pub fn can_use_any(&self, features: &[String]) -> bool {
        // Degraded mode allows everything, including the empty set — the
        // combinator boundary values only hold for a healthy layer.
        self.protect(true, |ctx| ctx.can_use_any(features))
    }

    pub fn can_use_all(&self, features: &[String]) -> bool {
        self.protect(true, |ctx| ctx.can_use_all(features))
    }

    pub fn is_loading(&self) -> bool {
        self.protect(false, |ctx| ctx.is_loading())
    }

    pub fn is_auth_ready(&self) -> bool {
        self.protect(true, |ctx| ctx.is_auth_ready())
    }

    /// Snapshot of the inner context, or the degraded fail-open snapshot.
    pub fn snapshot(&self) -> Arc<ContextSnapshot> {
        if let Some(err) = self.degraded_error() {
            return Arc::new(Self::degraded_snapshot(err));
        }
        match catch_unwind(AssertUnwindSafe(|| self.ctx.snapshot())) {
            Ok(snap) => snap,
            Err(payload) => {
                self.engage(payload);
                warn!("serving degraded snapshot");
                let err = self
                    .degraded_error()
                    .unwrap_or_else(|| Arc::new(GateError::Internal {
                        message: "unknown panic".into(),
                    }));
                Arc::new(Self::degraded_snapshot(err))
            }
        }
    }

    fn degraded_snapshot(err: Arc<GateError>) -> ContextSnapshot {
        ContextSnapshot {
            state: GateState::Ready,
            access: AccessMap::new(),
            error: Some(err),
            metrics: PerformanceMetrics {
                load_time_ms: 0,
                cache_hit_rate: 0.0,
                last_refresh: None,
                check_count: 0,
            },
            fail_open: true,
        }
    }
}
