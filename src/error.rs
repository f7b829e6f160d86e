//! Error taxonomy for the fetch path.
//!
//! Local admission delays (rate limiting) are waited on, never surfaced, and
//! key/value backend failures are swallowed into misses by the store adapter;
//! neither has a variant here.

use thiserror::Error;

/// Errors produced by the upstream fetch path.
///
/// The type is `Clone` because coalesced callers share a single in-flight
/// fetch and every waiter must observe the identical outcome, value or error.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network failure, 5xx response or timeout from the upstream.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Well-formed 4xx response. Client-attributable; never counted as a
    /// circuit breaker failure.
    #[error("upstream rejected request with status {status}")]
    BadStatus { status: u16, body: String },

    /// The circuit breaker is open and no fallback produced data.
    #[error("circuit breaker is open")]
    BreakerOpen,

    /// Fallback was requested but neither the fresh nor the stale tier holds
    /// an entry for the key.
    #[error("no cached data available for '{key}'")]
    NoCachedData { key: String },

    /// A payload could not be decoded into the expected shape.
    #[error("payload could not be decoded: {0}")]
    Serialization(String),
}

impl FetchError {
    /// Whether this error counts toward opening the circuit breaker.
    ///
    /// Only genuine upstream failures do; 4xx responses, open-breaker
    /// rejections and cache misses say nothing about upstream health.
    #[must_use]
    pub fn is_breaker_failure(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}
