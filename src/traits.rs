//! Backend trait seams.
//!
//! Two collaborators live behind trait objects: the key/value service the
//! cache tiers persist into, and the upstream HTTP wire. Both ship with a
//! production implementation (`RedisStore`, `HttpTransport`) and both can be
//! swapped for in-process doubles, which is how the integration suite runs
//! without Redis or a network.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;

/// Contract for a key/value backend.
///
/// Implementations speak their native error type through `anyhow`; the
/// [`KvStore`](crate::kv_store::KvStore) adapter above this trait is what
/// turns failures into misses and counts them.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; every method may be called from
/// many tasks at once.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Get the value stored at `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` at `key` with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Get many keys at once, preserving input order; absent keys yield
    /// `None` in their position.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Store many entries at once, each with its own time-to-live.
    async fn mset(&self, entries: &[(String, String, Duration)]) -> Result<()>;

    /// Delete a single key. Returns the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64>;

    /// Delete many keys at once. Returns the number of keys removed.
    async fn del_many(&self, keys: &[String]) -> Result<u64>;

    /// Enumerate keys matching a glob pattern (`*`, `?`).
    ///
    /// Must be a non-blocking, cursor-style iteration on remote backends,
    /// never a blocking full-keyspace command.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Remove every key in the store.
    async fn flush(&self) -> Result<()>;

    /// Liveness probe against the backend.
    async fn ping(&self) -> bool;

    /// Backend name for logs and metrics.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Raw wire access to the courts rental upstream.
///
/// One method is enough: every upstream operation is a JSON GET. The
/// transport owns the per-call timeout and maps transport-level failures
/// into the [`FetchError`] taxonomy (4xx → `BadStatus`, everything else →
/// `Upstream`). Retrying is deliberately not done here; the circuit breaker
/// above is the retry policy.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Perform `GET {base}{path_and_query}` and decode the body as JSON.
    async fn get_json(&self, path_and_query: &str) -> Result<Value, FetchError>;
}
