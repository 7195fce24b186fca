// SPDX-License-Identifier: MIT
//! Logging setup and latency tracking.

use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Initialise the tracing subscriber.
///
/// `filter` is an env-filter string (e.g. "info", "debug,featuregate=trace");
/// the `RUST_LOG` env var wins when set. `json` switches to structured
/// output for log aggregators. Safe to call once per process; subsequent
/// calls are ignored.
pub fn init_logging(filter: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_ok() {
        info!(json, "logging initialised");
    }
}

/// Track latency of an operation and emit a structured log event.
pub struct LatencyTracker {
    operation: String,
    start: Instant,
}

impl LatencyTracker {
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Finish tracking; returns the elapsed milliseconds so callers can feed
    /// [`crate::metrics::GateMetrics::record_load`].
    pub fn finish(self) -> u64 {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        if elapsed_ms > 1000 {
            info!(operation = %self.operation, elapsed_ms, "slow operation");
        } else {
            debug!(operation = %self.operation, elapsed_ms, "operation complete");
        }
        elapsed_ms
    }
}
