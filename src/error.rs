//! Error taxonomy for the gating layer.
//!
//! Errors stop at the resolver/context boundary — consumers always get a
//! usable boolean plus an optional structured error, never an `Err` from a
//! check call. See the fail-open/fail-closed mapping in [`crate::resolver`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// Network-level failure talking to the access oracle.
    #[error("oracle transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The hard client-side deadline elapsed before the oracle answered.
    #[error("oracle call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The oracle answered with a non-2xx status.
    #[error("oracle returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The oracle answered 2xx but the body did not parse.
    #[error("malformed oracle response: {0}")]
    Decode(#[from] serde_json::Error),

    /// An export job reached the `Failed` terminal state.
    #[error("export job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    /// Polling gave up before the job reached a terminal state.
    #[error("export job {job_id} still pending after {attempts} polls")]
    PollBudgetExhausted { job_id: String, attempts: u32 },

    /// A fault inside the access layer itself (caught panic). Recorded by
    /// the fallback boundary when it enters degraded mode.
    #[error("access layer fault: {message}")]
    Internal { message: String },
}

impl GateError {
    /// True for failures where the fail-open/fail-closed policy applies
    /// (anything that prevented getting an authoritative answer).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GateError::Transport(_)
                | GateError::Timeout { .. }
                | GateError::Api { .. }
                | GateError::Decode(_)
        )
    }
}
