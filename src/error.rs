//! Error taxonomy for the ingestion core (§7).
//!
//! One `thiserror` enum per semantic error kind named in the spec, rather
//! than a single opaque error type. Callers (backfill coordinator, failover
//! controller, composition layer) match on the variant to decide retry vs
//! failover vs fatal-exit, the way the teacher's `funding/error.rs` and
//! `api_auth/error.rs` split errors by the decision a caller needs to make.

use crate::core_types::{ProviderId, Symbol};
use thiserror::Error;

/// The full error taxonomy. Every fallible operation in the core returns
/// `Result<T, CoreError>` (or a narrower error that converts into it).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid or missing configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network, 5xx, or transient disk condition; retried with backoff.
    #[error("transient I/O error ({provider}): {message}")]
    TransientIo {
        provider: ProviderId,
        message: String,
    },

    /// 429 or vendor equivalent; causes provider rotation and cooldown.
    #[error("rate limited by {provider}")]
    RateLimited { provider: ProviderId },

    /// 401/403; fatal for that provider, not for the system.
    #[error("auth failure with {provider}: {message}")]
    AuthFailure {
        provider: ProviderId,
        message: String,
    },

    /// Gap/out-of-order/duplicate; never terminates the process.
    #[error("integrity violation for {symbol}: {detail}")]
    Integrity { symbol: Symbol, detail: String },

    /// No data exists for a `(symbol, date)` request — the provider's
    /// canonical "nothing happened" response (closed market, holiday, a
    /// symbol that did not trade). Not a failure: callers treat this as
    /// not-applicable rather than retrying or failing the job.
    #[error("no data for {symbol} on {date} from {provider}")]
    NoData {
        provider: ProviderId,
        symbol: Symbol,
        date: chrono::NaiveDate,
    },

    /// WAL/sink write failure; offending record goes to the drop audit.
    #[error("durability failure: {0}")]
    Durability(String),

    /// Unrecoverable invariant violation; process should exit non-zero
    /// after a best-effort flush.
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable reason code for structured log lines and the drop audit
    /// trail, matching the `reason` field in `_audit/dropped_events.jsonl`.
    pub fn reason_code(&self) -> &'static str {
        match self {
            CoreError::Configuration(_) => "configuration",
            CoreError::TransientIo { .. } => "transient_io",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::AuthFailure { .. } => "auth_failure",
            CoreError::Integrity { .. } => "integrity",
            CoreError::NoData { .. } => "no_data",
            CoreError::Durability(_) => "durability",
            CoreError::Fatal(_) => "fatal",
            CoreError::Io(_) => "io",
            CoreError::Serde(_) => "serde",
        }
    }

    /// Whether the backfill coordinator should retry a request that failed
    /// with this error, per §4.9: retryable = network, 5xx, 429.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientIo { .. } | CoreError::RateLimited { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
