//! Request coalescing and bounded fan-out.
//!
//! `execute_batched` collapses concurrent fetches sharing a cache key into
//! one underlying operation whose outcome (value or error) every waiter
//! observes. `execute_concurrent` runs a task list with a concurrency cap,
//! preserving input order in the output.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// De-duplicates in-flight fetches by cache key.
pub struct RequestCoalescer {
    in_flight: Arc<DashMap<String, SharedFetch>>,
    coalesced_waiters: AtomicU64,
}

impl Default for RequestCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCoalescer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            coalesced_waiters: AtomicU64::new(0),
        }
    }

    /// Run `fetch` at most once per key at a time.
    ///
    /// If an entry for `key` is already in flight, the caller awaits the
    /// same shared future and receives the identical outcome. Otherwise the
    /// fetch is registered, runs, and removes its entry on settle, success
    /// and failure alike, so a later call starts fresh. A caller that drops its
    /// await does not cancel the fetch for the remaining waiters.
    pub async fn execute_batched<F, Fut>(&self, key: &str, fetch: F) -> Result<Value, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        let shared = {
            // Build the candidate future first; the entry guard must only be
            // held for the map update itself.
            let map = Arc::clone(&self.in_flight);
            let owned_key = key.to_string();
            let candidate = {
                let owned_key = owned_key.clone();
                let fut = fetch();
                async move {
                    let result = fut.await;
                    map.remove(&owned_key);
                    result
                }
            }
            .boxed()
            .shared();

            match self.in_flight.entry(owned_key) {
                Entry::Occupied(entry) => {
                    self.coalesced_waiters.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "coalescing onto in-flight fetch");
                    entry.get().clone()
                }
                Entry::Vacant(entry) => {
                    entry.insert(candidate.clone());
                    candidate
                }
            }
        };

        shared.await
    }

    /// Run `tasks` with at most `max_concurrency` in flight, returning
    /// results in input order.
    ///
    /// The first failure propagates and no further task is started; tasks
    /// already in flight are simply no longer awaited (coalesced fetches
    /// keep settling for their other waiters regardless).
    pub async fn execute_concurrent<T, F, Fut>(
        &self,
        tasks: Vec<F>,
        max_concurrency: usize,
    ) -> Result<Vec<T>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        stream::iter(tasks.into_iter().map(|task| task()))
            .buffered(max_concurrency.max(1))
            .try_collect()
            .await
    }

    /// Number of fetches currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Callers that joined an already in-flight fetch.
    #[must_use]
    pub fn coalesced_waiters(&self) -> u64 {
        self.coalesced_waiters.load(Ordering::Relaxed)
    }
}
