use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::error;

const DEFAULT_API_BASE_URL: &str = "https://api.featuregate.io";
const DEFAULT_ACCESS_TTL_SECS: u64 = 300;
const DEFAULT_QUOTA_TTL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_JOB_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_JOB_POLL_MAX_ATTEMPTS: u32 = 60;

// ─── RetrySettings ────────────────────────────────────────────────────────────

/// Resolver retry policy (`[retry]` in config.toml).
///
/// A single fixed-delay retry by default — the gating path falls back to the
/// fail-open/fail-closed policy rather than looping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum attempts including the first call (default: 2).
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds (default: 1000).
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

// ─── JobSettings ─────────────────────────────────────────────────────────────

/// Export-job polling configuration (`[jobs]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobSettings {
    /// Seconds between status polls (default: 5).
    pub poll_interval_secs: u64,
    /// Give up after this many polls without a terminal state (default: 60,
    /// i.e. five minutes at the default interval).
    pub poll_max_attempts: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_JOB_POLL_INTERVAL_SECS,
            poll_max_attempts: DEFAULT_JOB_POLL_MAX_ATTEMPTS,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `config.toml` — all fields are optional overrides.
/// Priority: explicit arg / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Override the oracle base URL (default: https://api.featuregate.io).
    api_base_url: Option<String>,
    /// Bearer token for oracle calls. Omit for anonymous/dev use.
    api_token: Option<String>,
    /// Seconds a cached boolean access result stays fresh (default: 300).
    access_ttl_secs: Option<u64>,
    /// Seconds a cached quota record stays fresh (default: 30).
    /// Shorter than access — quotas move with active consumption.
    quota_ttl_secs: Option<u64>,
    /// Hard deadline for one oracle round trip, seconds (default: 5).
    request_timeout_secs: Option<u64>,
    /// Resolver retry policy (`[retry]`).
    retry: Option<RetrySettings>,
    /// Export-job polling (`[jobs]`).
    jobs: Option<JobSettings>,
    /// Features resolved for every authenticated session regardless of route.
    essential_features: Option<Vec<String>>,
    /// Features that fail OPEN on transport failure (core navigation pages).
    /// Everything else fails closed.
    failopen_features: Option<Vec<String>>,
    /// Routes reachable without authentication; no resolution runs for them.
    public_routes: Option<Vec<String>>,
    /// Extra features per route, beyond the essential set (`[routes]`).
    /// Example: `"/admin" = ["page_access_admin", "team_management"]`.
    routes: Option<HashMap<String, Vec<String>>>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
}

fn load_toml(path: &Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── GateConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Oracle base URL (FEATUREGATE_API_URL env var).
    pub api_base_url: String,
    /// Bearer token for oracle calls (FEATUREGATE_API_TOKEN env var).
    /// None means unauthenticated calls — dev/test only.
    pub api_token: Option<String>,
    /// Staleness window for boolean access results.
    pub access_ttl: Duration,
    /// Staleness window for quota records. Kept separate from `access_ttl`:
    /// plan-derived capability flags change rarely, consumption counters often.
    pub quota_ttl: Duration,
    /// Hard deadline for one oracle round trip.
    pub request_timeout: Duration,
    /// Resolver retry policy.
    pub retry: RetrySettings,
    /// Export-job polling.
    pub jobs: JobSettings,
    /// Features resolved on every sign-in, before any route lookup.
    pub essential_features: Vec<String>,
    /// Transport failures grant these instead of denying — a backend hiccup
    /// must not lock users out of primary navigation.
    pub failopen_features: Vec<String>,
    /// Unauthenticated-accessible routes.
    pub public_routes: Vec<String>,
    /// Route path → extra features for that route.
    pub routes: HashMap<String, Vec<String>>,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            access_ttl: Duration::from_secs(DEFAULT_ACCESS_TTL_SECS),
            quota_ttl: Duration::from_secs(DEFAULT_QUOTA_TTL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetrySettings::default(),
            jobs: JobSettings::default(),
            essential_features: crate::routes::default_essential_features(),
            failopen_features: crate::routes::default_failopen_features(),
            public_routes: crate::routes::default_public_routes(),
            routes: crate::routes::default_route_features(),
            log_format: "pretty".to_string(),
        }
    }
}

impl GateConfig {
    /// Build config from env vars + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. Env var (FEATUREGATE_API_URL, FEATUREGATE_API_TOKEN)
    ///   2. TOML file at `config_path`, when supplied and readable
    ///   3. Built-in defaults
    pub fn load(config_path: Option<&Path>) -> Self {
        let toml = config_path
            .and_then(load_toml)
            .unwrap_or_default();
        let defaults = GateConfig::default();

        let api_base_url = std::env::var("FEATUREGATE_API_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.api_base_url)
            .unwrap_or(defaults.api_base_url);

        let api_token = std::env::var("FEATUREGATE_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or(toml.api_token);

        Self {
            api_base_url,
            api_token,
            access_ttl: Duration::from_secs(
                toml.access_ttl_secs.unwrap_or(DEFAULT_ACCESS_TTL_SECS),
            ),
            quota_ttl: Duration::from_secs(toml.quota_ttl_secs.unwrap_or(DEFAULT_QUOTA_TTL_SECS)),
            request_timeout: Duration::from_secs(
                toml.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            retry: toml.retry.unwrap_or_default(),
            jobs: toml.jobs.unwrap_or_default(),
            essential_features: toml.essential_features.unwrap_or(defaults.essential_features),
            failopen_features: toml.failopen_features.unwrap_or(defaults.failopen_features),
            public_routes: toml.public_routes.unwrap_or(defaults.public_routes),
            routes: toml.routes.unwrap_or(defaults.routes),
            log_format: toml.log_format.unwrap_or(defaults.log_format),
        }
    }

    /// True when transport failures should grant `feature` instead of denying.
    pub fn fails_open(&self, feature: &str) -> bool {
        self.failopen_features.iter().any(|f| f == feature)
    }

    /// The retry policy as a [`crate::retry::RetryConfig`].
    pub fn retry_config(&self) -> crate::retry::RetryConfig {
        crate::retry::RetryConfig {
            max_attempts: self.retry.max_attempts,
            delay: Duration::from_millis(self.retry.delay_ms),
        }
    }
}
