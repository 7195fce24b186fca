//! Export job submission and polling.
//!
//! Content exports run server-side: submit returns a job id, and the only
//! delivery mechanism is polling the status endpoint at a fixed interval
//! (default 5 s) until a terminal state. No push channel exists.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::JobSettings;
use crate::error::GateError;
use crate::oracle::AccessOracle;

// ─── Types ────────────────────────────────────────────────────────────────────

/// Export formats the backend renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Docx,
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    /// Client-generated idempotency key — resubmitting the same request
    /// after a transport failure must not create a second job.
    pub request_id: Uuid,
    /// Id of the content document to export.
    pub content_id: String,
    pub format: ExportFormat,
}

impl ExportRequest {
    pub fn new(content_id: impl Into<String>, format: ExportFormat) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            content_id: content_id.into(),
            format,
        }
    }
}

/// Status of a submitted export job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed { download_url: String },
    Failed { reason: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed { .. } | JobStatus::Failed { .. })
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// Submit-and-poll client for export jobs.
#[derive(Clone)]
pub struct JobClient {
    oracle: Arc<dyn AccessOracle>,
    poll_interval: Duration,
    poll_max_attempts: u32,
}

impl JobClient {
    pub fn new(oracle: Arc<dyn AccessOracle>, settings: &JobSettings) -> Self {
        Self {
            oracle,
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            poll_max_attempts: settings.poll_max_attempts,
        }
    }

    /// Submit an export job; returns the backend-assigned job id.
    pub async fn submit(
        &self,
        user_id: &str,
        request: &ExportRequest,
    ) -> Result<String, GateError> {
        let job_id = self.oracle.submit_export(user_id, request).await?;
        info!(job_id = %job_id, content_id = %request.content_id, "export job submitted");
        Ok(job_id)
    }

    /// Fetch the current status once.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, GateError> {
        self.oracle.job_status(job_id).await
    }

    /// Poll at the fixed interval until the job completes.
    ///
    /// Returns the download URL on completion, `GateError::JobFailed` when
    /// the backend reports failure, and `GateError::PollBudgetExhausted`
    /// when the attempt cap runs out first. A transient status-poll error
    /// spends an attempt but does not abort the wait.
    pub async fn wait(&self, job_id: &str) -> Result<String, GateError> {
        for attempt in 1..=self.poll_max_attempts {
            match self.oracle.job_status(job_id).await {
                Ok(JobStatus::Completed { download_url }) => {
                    info!(job_id, attempt, "export job completed");
                    return Ok(download_url);
                }
                Ok(JobStatus::Failed { reason }) => {
                    return Err(GateError::JobFailed {
                        job_id: job_id.to_string(),
                        reason,
                    });
                }
                Ok(status) => {
                    debug!(job_id, attempt, ?status, "export job still pending");
                }
                Err(e) => {
                    debug!(job_id, attempt, err = %e, "status poll failed — will retry");
                }
            }
            if attempt < self.poll_max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(GateError::PollBudgetExhausted {
            job_id: job_id.to_string(),
            attempts: self.poll_max_attempts,
        })
    }
}
