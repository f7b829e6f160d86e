//! Circuit breaker guarding the upstream.
//!
//! Single instance per upstream, not keyed per operation. State lives in a
//! sync mutex whose critical sections are single field updates; the guarded
//! operation itself always runs outside the lock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Primary calls are suppressed until the timeout elapses.
    Open,
    /// Trial calls run; enough successes close, any failure reopens.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    trial_successes: u32,
    opened_at: Option<Instant>,
    last_failure: Option<Instant>,
    last_failure_unix_ms: Option<u64>,
}

/// Snapshot of the breaker for the metrics surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_unix_ms: Option<u64>,
    pub ms_since_last_failure: Option<u64>,
}

/// Three-state circuit breaker.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, timeout: Duration, success_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                trial_successes: 0,
                opened_at: None,
                last_failure: None,
                last_failure_unix_ms: None,
            }),
            failure_threshold: failure_threshold.max(1),
            timeout,
            success_threshold: success_threshold.max(1),
        }
    }

    /// Run `primary` under the breaker.
    ///
    /// When the breaker is open and the timeout has not elapsed, `primary`
    /// is not invoked and the call fails with [`FetchError::BreakerOpen`].
    /// Failures that say nothing about upstream health (4xx, cache misses)
    /// do not move the failure count.
    pub async fn execute<T, Fut>(&self, primary: impl FnOnce() -> Fut) -> Result<T, FetchError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if !self.try_acquire() {
            return Err(FetchError::BreakerOpen);
        }

        match primary().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                if e.is_breaker_failure() {
                    self.on_failure();
                }
                Err(e)
            }
        }
    }

    /// Run `primary` under the breaker, diverting every failure, including
    /// an open breaker, to `fallback`.
    pub async fn execute_with_fallback<T, PFut, FFut>(
        &self,
        primary: impl FnOnce() -> PFut,
        fallback: impl FnOnce(FetchError) -> FFut,
    ) -> Result<T, FetchError>
    where
        PFut: Future<Output = Result<T, FetchError>>,
        FFut: Future<Output = Result<T, FetchError>>,
    {
        match self.execute(primary).await {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!(error = %e, "primary failed, running fallback");
                fallback(e).await
            }
        }
    }

    /// Admission check. Open → half-open once the timeout has elapsed.
    fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let timed_out = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.timeout);
                if timed_out {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_successes = 0;
                    debug!("breaker half-open, admitting trial call");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.opened_at = None;
                    debug!("breaker closed after successful trials");
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        inner.last_failure_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);

        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        failures = inner.failure_count,
                        "breaker opened, suppressing upstream calls"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("trial call failed, breaker reopened");
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_unix_ms: inner.last_failure_unix_ms,
            ms_since_last_failure: inner
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(60), 3)
    }

    async fn fail(b: &CircuitBreaker) -> Result<u32, FetchError> {
        b.execute(|| async { Err(FetchError::Upstream("boom".into())) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<u32, FetchError> {
        b.execute(|| async { Ok(1) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let b = breaker();
        for _ in 0..5 {
            assert!(fail(&b).await.is_err());
        }
        assert_eq!(b.state(), BreakerState::Open);

        // Primary suppressed while open.
        let called = std::sync::atomic::AtomicBool::new(false);
        let result: Result<u32, _> = b
            .execute(|| {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;
        assert!(matches!(result, Err(FetchError::BreakerOpen)));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn success_resets_the_consecutive_count() {
        let b = breaker();
        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        assert!(succeed(&b).await.is_ok());
        // Four more failures do not reach the threshold again.
        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn bad_status_is_not_a_breaker_failure() {
        let b = breaker();
        for _ in 0..10 {
            let result: Result<u32, _> = b
                .execute(|| async {
                    Err(FetchError::BadStatus {
                        status: 404,
                        body: String::new(),
                    })
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_through_half_open_after_timeout() {
        let b = breaker();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;

        // Three successful trials close the breaker.
        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(succeed(&b).await.is_ok());
        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_immediately() {
        let b = breaker();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        // The reopen resets the timeout clock: still suppressed shortly after.
        tokio::time::advance(Duration::from_secs(30)).await;
        let result: Result<u32, _> = b.execute(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(FetchError::BreakerOpen)));
    }

    #[tokio::test]
    async fn fallback_runs_on_open_breaker() {
        let b = breaker();
        for _ in 0..5 {
            let _ = fail(&b).await;
        }

        let result = b
            .execute_with_fallback(
                || async { Ok(0) },
                |e| async move {
                    assert!(matches!(e, FetchError::BreakerOpen));
                    Ok(42)
                },
            )
            .await;
        assert_eq!(result.ok(), Some(42));
    }
}
