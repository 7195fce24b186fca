//! The remote access oracle — the single authority for entitlement.
//!
//! The client never computes entitlement itself: every boolean permission and
//! every usage counter comes from the backend through [`AccessOracle`]. The
//! trait keeps the resolver, quota tracker, and tests independent of the HTTP
//! transport; [`HttpOracle`] is the production implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::GateConfig;
use crate::error::GateError;
use crate::jobs::{ExportRequest, JobStatus};
use crate::quota::QuotaRecord;

/// Resolved entitlement booleans, keyed by feature name.
///
/// Absence of a key means "not yet resolved" and every read path treats it
/// as `false` — never as an error.
pub type AccessMap = HashMap<String, bool>;

// ─── Trait ────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait AccessOracle: Send + Sync {
    /// Resolve entitlement for many features in one round trip.
    ///
    /// The returned map may omit names the backend chose not to answer;
    /// omission reads as denied.
    async fn check_features(
        &self,
        user_id: &str,
        features: &[String],
    ) -> Result<AccessMap, GateError>;

    /// Fetch the quota record for one feature.
    async fn quota(&self, user_id: &str, feature: &str) -> Result<QuotaRecord, GateError>;

    /// Fetch quota records for many features in one round trip.
    async fn quotas(
        &self,
        user_id: &str,
        features: &[String],
    ) -> Result<HashMap<String, QuotaRecord>, GateError>;

    /// Atomically increment usage server-side and return the post-increment
    /// record. This call is the sole authority on whether a metered action
    /// may proceed — callers must not act before a successful response.
    async fn consume(&self, user_id: &str, feature: &str) -> Result<QuotaRecord, GateError>;

    /// Submit an export job; returns the backend-assigned job id.
    async fn submit_export(
        &self,
        user_id: &str,
        request: &ExportRequest,
    ) -> Result<String, GateError>;

    /// Fetch the current status of an export job.
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, GateError>;
}

// ─── API types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkCheckRequest<'a> {
    user_id: &'a str,
    feature_names: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkCheckResponse {
    access: AccessMap,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuotaRequest<'a> {
    user_id: &'a str,
    feature_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkQuotaRequest<'a> {
    user_id: &'a str,
    feature_names: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkQuotaResponse {
    quotas: HashMap<String, QuotaRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitExportResponse {
    job_id: String,
}

// ─── HTTP implementation ──────────────────────────────────────────────────────

/// Production oracle: JSON over HTTPS against the backend API.
pub struct HttpOracle {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpOracle {
    /// Build an oracle from config. The hard request timeout (5 s by
    /// default) is baked into the client — a hung backend call is aborted
    /// and surfaces as a transport failure.
    pub fn new(config: &GateConfig) -> Result<Self, GateError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Map a non-2xx response into `GateError::Api` with the body text.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GateError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(GateError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Parse a 2xx body; malformed JSON surfaces as `GateError::Decode`
    /// rather than a transport failure.
    async fn read_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, GateError> {
        let body = Self::check_status(resp).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl AccessOracle for HttpOracle {
    async fn check_features(
        &self,
        user_id: &str,
        features: &[String],
    ) -> Result<AccessMap, GateError> {
        let resp = self
            .request(reqwest::Method::POST, "/access/check")
            .json(&BulkCheckRequest {
                user_id,
                feature_names: features,
            })
            .send()
            .await?;
        let body: BulkCheckResponse = Self::read_json(resp).await?;
        Ok(body.access)
    }

    async fn quota(&self, user_id: &str, feature: &str) -> Result<QuotaRecord, GateError> {
        let resp = self
            .request(reqwest::Method::POST, "/quota/get")
            .json(&QuotaRequest {
                user_id,
                feature_name: feature,
            })
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn quotas(
        &self,
        user_id: &str,
        features: &[String],
    ) -> Result<HashMap<String, QuotaRecord>, GateError> {
        let resp = self
            .request(reqwest::Method::POST, "/quota/bulk")
            .json(&BulkQuotaRequest {
                user_id,
                feature_names: features,
            })
            .send()
            .await?;
        let body: BulkQuotaResponse = Self::read_json(resp).await?;
        Ok(body.quotas)
    }

    async fn consume(&self, user_id: &str, feature: &str) -> Result<QuotaRecord, GateError> {
        let resp = self
            .request(reqwest::Method::POST, "/quota/consume")
            .json(&QuotaRequest {
                user_id,
                feature_name: feature,
            })
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn submit_export(
        &self,
        user_id: &str,
        request: &ExportRequest,
    ) -> Result<String, GateError> {
        let resp = self
            .request(reqwest::Method::POST, "/export/submit")
            .json(&serde_json::json!({
                "userId": user_id,
                "request": request,
            }))
            .send()
            .await?;
        let body: SubmitExportResponse = Self::read_json(resp).await?;
        Ok(body.job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, GateError> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/export/status/{job_id}"))
            .send()
            .await?;
        Self::read_json(resp).await
    }
}
