// SPDX-License-Identifier: MIT
//! Access-result cache keyed by (user, feature-set signature).
//!
//! A cache entry covers one bulk round trip: the sorted, deduplicated
//! feature set is the signature, so the same set requested in any element
//! order hits the same entry. Entries carry an issue-time generation; a
//! write-back is discarded when the entry was already refreshed by a request
//! issued later, which keeps a slow out-of-order response from clobbering
//! fresher data (see [`crate::resolver`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::oracle::AccessMap;

/// Canonical signature for a feature set: sorted, deduplicated, joined.
///
/// `["b", "a", "b"]` and `["a", "b"]` produce the same signature.
pub fn set_signature(features: &[String]) -> String {
    let mut sorted: Vec<&str> = features.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join("\u{1f}")
}

struct Entry {
    access: AccessMap,
    fetched_at: Instant,
    generation: u64,
}

/// Shared cache of resolved access maps.
///
/// Cheaply cloneable — clones share state via `Arc`.
#[derive(Clone)]
pub struct AccessCache {
    entries: Arc<RwLock<HashMap<(String, String), Entry>>>,
    ttl: Duration,
    generation: Arc<AtomicU64>,
}

impl AccessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Take a generation for a request about to be issued. Generations are
    /// monotonic across the cache, so later-issued requests always hold
    /// larger values.
    pub fn issue_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fresh cached result for (user, signature), if any.
    pub async fn get_fresh(&self, user_id: &str, signature: &str) -> Option<AccessMap> {
        let entries = self.entries.read().await;
        let entry = entries.get(&(user_id.to_string(), signature.to_string()))?;
        if entry.fetched_at.elapsed() < self.ttl {
            debug!(user_id, "access cache hit");
            Some(entry.access.clone())
        } else {
            None
        }
    }

    /// Write back a resolved map for the request issued at `generation`.
    ///
    /// Returns `false` (and leaves the entry untouched) when the key already
    /// holds data from a later-issued request.
    pub async fn store(
        &self,
        user_id: &str,
        signature: &str,
        generation: u64,
        access: AccessMap,
    ) -> bool {
        let key = (user_id.to_string(), signature.to_string());
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&key) {
            if existing.generation > generation {
                debug!(user_id, generation, "discarding superseded access response");
                return false;
            }
        }
        entries.insert(
            key,
            Entry {
                access,
                fetched_at: Instant::now(),
                generation,
            },
        );
        true
    }

    /// Drop every entry for `user_id` (sign-out, role change).
    pub async fn invalidate_user(&self, user_id: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|(u, _), _| u != user_id);
    }

    /// Drop everything.
    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }
}
