// SPDX-License-Identifier: MIT
//! Bounded fixed-delay retry for oracle calls.
//!
//! The gating path deliberately avoids an exponential loop: an entitlement
//! check that cannot be answered quickly falls back to the fail-open /
//! fail-closed policy instead of blocking navigation. So: at most
//! `max_attempts` tries with a fixed pause between them, then the last error
//! surfaces to the caller.

use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for [`retry_fixed`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first try).
    ///
    /// Default: 2 — one initial call plus one retry.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    ///
    /// Default: 1 s
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_secs(1),
        }
    }
}

/// Retry an async operation with a fixed delay between attempts.
///
/// Calls `f()` up to `config.max_attempts` times. Returns `Ok` on the first
/// success, or the last error once attempts are exhausted.
///
/// # Panics
/// Panics if `config.max_attempts` is 0 (would never attempt the operation).
pub async fn retry_fixed<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    assert!(
        config.max_attempts > 0,
        "RetryConfig.max_attempts must be at least 1"
    );

    let mut last_err: Option<E> = None;

    for attempt in 1..=config.max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt < config.max_attempts {
                    warn!(
                        attempt,
                        max = config.max_attempts,
                        delay_ms = config.delay.as_millis(),
                        err = ?e,
                        "attempt failed — retrying"
                    );
                    tokio::time::sleep(config.delay).await;
                } else {
                    warn!(attempt, max = config.max_attempts, err = ?e, "attempts exhausted");
                    last_err = Some(e);
                }
            }
        }
    }

    // Safety: the loop always assigns last_err when all attempts fail.
    Err(last_err.expect("retry loop ended without setting last_err"))
}
