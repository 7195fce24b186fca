//! Client-side feature entitlement gating.
//!
//! The backend is the single authority on who may use what; this crate is
//! the client's view of it: a session-scoped [`context::AccessContext`]
//! composing a route optimizer, a batching [`resolver::BulkResolver`] over a
//! TTL'd [`cache::AccessCache`], a parallel [`quota::QuotaTracker`], and a
//! fail-open [`fallback::GuardedGate`] so a broken gating layer degrades to
//! "allow" instead of locking users out.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod jobs;
pub mod metrics;
pub mod observability;
pub mod oracle;
pub mod quota;
pub mod resolver;
pub mod retry;
pub mod routes;

pub use config::GateConfig;
pub use context::{AccessContext, ContextSnapshot, GateState};
pub use error::GateError;
pub use fallback::GuardedGate;
pub use oracle::{AccessMap, AccessOracle, HttpOracle};
pub use quota::{Limit, QuotaRecord, QuotaTracker};
