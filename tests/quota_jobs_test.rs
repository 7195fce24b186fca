//! Integration tests for the quota tracker and export-job polling.
//!
//! Tests cover:
//! 1. Quota caching: one transport call per (user, feature) per window
//! 2. Bulk quota: one round trip, missing names read as unlimited
//! 3. Fetch failure synthesizes unlimited and does not pin the cache
//! 4. Consume: server record wins on success, rollback on failure
//! 5. Jobs: poll to completion, failure, and poll-budget exhaustion

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use featuregate::config::JobSettings;
use featuregate::jobs::{ExportFormat, ExportRequest, JobClient, JobStatus};
use featuregate::oracle::{AccessMap, AccessOracle};
use featuregate::quota::{Limit, QuotaRecord, QuotaTracker};
use featuregate::GateError;

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn record(used: u64, limit: u64) -> QuotaRecord {
    QuotaRecord {
        used,
        limit: Limit::Finite(limit),
        reset_at: Utc::now(),
    }
}

/// Oracle with scripted quota records and job statuses.
struct MeterOracle {
    records: HashMap<String, QuotaRecord>,
    fail_quota: bool,
    fail_consume: bool,
    quota_calls: AtomicU32,
    consume_calls: AtomicU32,
    job_statuses: Mutex<Vec<JobStatus>>,
    status_calls: AtomicU32,
}

impl MeterOracle {
    fn with_records(pairs: &[(&str, QuotaRecord)]) -> Arc<Self> {
        Arc::new(Self {
            records: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            fail_quota: false,
            fail_consume: false,
            quota_calls: AtomicU32::new(0),
            consume_calls: AtomicU32::new(0),
            job_statuses: Mutex::new(vec![]),
            status_calls: AtomicU32::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        let mut o = Self::template();
        o.fail_quota = true;
        o.fail_consume = true;
        Arc::new(o)
    }

    /// Quota reads succeed; increments are refused.
    fn consume_failing(pairs: &[(&str, QuotaRecord)]) -> Arc<Self> {
        let mut o = Self::template();
        o.records = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        o.fail_consume = true;
        Arc::new(o)
    }

    fn with_job_script(statuses: Vec<JobStatus>) -> Arc<Self> {
        let o = Self::template();
        *o.job_statuses.lock().unwrap() = statuses;
        Arc::new(o)
    }

    fn template() -> Self {
        Self {
            records: HashMap::new(),
            fail_quota: false,
            fail_consume: false,
            quota_calls: AtomicU32::new(0),
            consume_calls: AtomicU32::new(0),
            job_statuses: Mutex::new(vec![]),
            status_calls: AtomicU32::new(0),
        }
    }

    fn denied() -> GateError {
        GateError::Api {
            status: 503,
            message: "unavailable".into(),
        }
    }
}

#[async_trait]
impl AccessOracle for MeterOracle {
    async fn check_features(
        &self,
        _u: &str,
        _f: &[String],
    ) -> Result<AccessMap, GateError> {
        Ok(AccessMap::new())
    }

    async fn quota(&self, _u: &str, feature: &str) -> Result<QuotaRecord, GateError> {
        self.quota_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_quota {
            return Err(Self::denied());
        }
        Ok(self
            .records
            .get(feature)
            .cloned()
            .unwrap_or_else(QuotaRecord::unlimited))
    }

    async fn quotas(
        &self,
        _u: &str,
        features: &[String],
    ) -> Result<HashMap<String, QuotaRecord>, GateError> {
        self.quota_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_quota {
            return Err(Self::denied());
        }
        // Answer only for known names; the tracker must fill the rest.
        Ok(features
            .iter()
            .filter_map(|f| self.records.get(f).map(|r| (f.clone(), r.clone())))
            .collect())
    }

    async fn consume(&self, _u: &str, feature: &str) -> Result<QuotaRecord, GateError> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_consume {
            return Err(Self::denied());
        }
        let mut rec = self
            .records
            .get(feature)
            .cloned()
            .unwrap_or_else(QuotaRecord::unlimited);
        rec.used += 1;
        Ok(rec)
    }

    async fn submit_export(&self, _u: &str, _r: &ExportRequest) -> Result<String, GateError> {
        Ok("job-42".into())
    }

    async fn job_status(&self, _id: &str) -> Result<JobStatus, GateError> {
        let idx = self.status_calls.fetch_add(1, Ordering::SeqCst) as usize;
        let statuses = self.job_statuses.lock().unwrap();
        Ok(statuses
            .get(idx)
            .cloned()
            .unwrap_or_else(|| statuses.last().cloned().unwrap_or(JobStatus::Pending)))
    }
}

fn fast_jobs() -> JobSettings {
    JobSettings {
        poll_interval_secs: 0,
        poll_max_attempts: 5,
    }
}

// ─── Test 1: quota caching ────────────────────────────────────────────────────

#[tokio::test]
async fn quota_is_cached_within_its_window() {
    let oracle = MeterOracle::with_records(&[("content_generation", record(3, 10))]);
    let tracker = QuotaTracker::new(oracle.clone(), Duration::from_secs(60));

    let a = tracker.quota("u1", "content_generation").await;
    let b = tracker.quota("u1", "content_generation").await;
    assert_eq!(a.used, 3);
    assert_eq!(b.remaining(), Some(7));
    assert_eq!(oracle.quota_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn quota_refetches_after_window_expiry() {
    let oracle = MeterOracle::with_records(&[("content_generation", record(3, 10))]);
    let tracker = QuotaTracker::new(oracle.clone(), Duration::from_millis(10));

    tracker.quota("u1", "content_generation").await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    tracker.quota("u1", "content_generation").await;
    assert_eq!(oracle.quota_calls.load(Ordering::SeqCst), 2);
}

// ─── Test 2: bulk quota ───────────────────────────────────────────────────────

#[tokio::test]
async fn bulk_quota_is_one_round_trip_and_fills_missing() {
    let oracle = MeterOracle::with_records(&[("a", record(1, 5)), ("b", record(5, 5))]);
    let tracker = QuotaTracker::new(oracle.clone(), Duration::from_secs(60));

    let quotas = tracker
        .quotas("u1", &["a".into(), "b".into(), "unknown".into()])
        .await;
    assert_eq!(oracle.quota_calls.load(Ordering::SeqCst), 1);
    assert!(quotas["a"].can_use());
    assert!(!quotas["b"].can_use()); // at the ceiling
    assert_eq!(quotas["unknown"].limit, Limit::Unlimited);
}

#[tokio::test]
async fn bulk_quota_serves_cached_entries_without_a_call() {
    let oracle = MeterOracle::with_records(&[("a", record(1, 5)), ("b", record(2, 5))]);
    let tracker = QuotaTracker::new(oracle.clone(), Duration::from_secs(60));

    tracker.quotas("u1", &["a".into(), "b".into()]).await;
    let again = tracker.quotas("u1", &["a".into(), "b".into()]).await;
    assert_eq!(again["b"].used, 2);
    assert_eq!(oracle.quota_calls.load(Ordering::SeqCst), 1);
}

// ─── Test 3: failure synthesizes unlimited ───────────────────────────────────

#[tokio::test]
async fn quota_failure_is_unlimited_and_uncached() {
    let oracle = MeterOracle::failing();
    let tracker = QuotaTracker::new(oracle.clone(), Duration::from_secs(60));

    let rec = tracker.quota("u1", "content_generation").await;
    assert_eq!(rec.limit, Limit::Unlimited);
    assert!(rec.can_use());

    // Synthesized records are not pinned: the next read retries the oracle.
    tracker.quota("u1", "content_generation").await;
    assert_eq!(oracle.quota_calls.load(Ordering::SeqCst), 2);
}

// ─── Test 4: consume ─────────────────────────────────────────────────────────

#[tokio::test]
async fn consume_success_installs_the_server_record() {
    let oracle = MeterOracle::with_records(&[("content_generation", record(3, 10))]);
    let tracker = QuotaTracker::new(oracle.clone(), Duration::from_secs(60));

    tracker.quota("u1", "content_generation").await; // warm the cache
    let rec = tracker.consume("u1", "content_generation").await.unwrap();
    assert_eq!(rec.used, 4); // post-increment, straight from the server

    // Cached copy is the authoritative record — no extra fetch.
    let cached = tracker.quota("u1", "content_generation").await;
    assert_eq!(cached.used, 4);
    assert_eq!(oracle.quota_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn consume_failure_rolls_back_the_tentative_count() {
    let oracle = MeterOracle::consume_failing(&[("content_generation", record(3, 10))]);
    let tracker = QuotaTracker::new(oracle.clone(), Duration::from_secs(60));
    tracker.quota("u1", "content_generation").await; // warm the cache

    let err = tracker.consume("u1", "content_generation").await;
    assert!(err.is_err());
    assert_eq!(oracle.consume_calls.load(Ordering::SeqCst), 1);

    // The snapshot was restored: the cached count is back to the
    // pre-consume value, with no extra fetch.
    let rec = tracker.quota("u1", "content_generation").await;
    assert_eq!(rec.used, 3);
    assert_eq!(oracle.quota_calls.load(Ordering::SeqCst), 1);
}

// ─── Test 5: export jobs ─────────────────────────────────────────────────────

#[tokio::test]
async fn job_polls_until_completed() {
    let oracle = MeterOracle::with_job_script(vec![
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed {
            download_url: "https://cdn/export.pdf".into(),
        },
    ]);
    let client = JobClient::new(oracle.clone(), &fast_jobs());

    let job_id = client
        .submit("u1", &ExportRequest::new("doc-7", ExportFormat::Pdf))
        .await
        .unwrap();
    assert_eq!(job_id, "job-42");

    let url = client.wait(&job_id).await.unwrap();
    assert_eq!(url, "https://cdn/export.pdf");
    assert_eq!(oracle.status_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn job_failure_surfaces_the_reason() {
    let oracle = MeterOracle::with_job_script(vec![
        JobStatus::Running,
        JobStatus::Failed {
            reason: "template render error".into(),
        },
    ]);
    let client = JobClient::new(oracle, &fast_jobs());

    let err = client.wait("job-42").await.unwrap_err();
    match err {
        GateError::JobFailed { reason, .. } => assert!(reason.contains("render")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn job_poll_budget_is_bounded() {
    let oracle = MeterOracle::with_job_script(vec![JobStatus::Pending]);
    let client = JobClient::new(oracle.clone(), &fast_jobs());

    let err = client.wait("job-42").await.unwrap_err();
    assert!(matches!(err, GateError::PollBudgetExhausted { attempts: 5, .. }));
    assert_eq!(oracle.status_calls.load(Ordering::SeqCst), 5);
}
