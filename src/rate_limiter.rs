//! Fixed-window rate limiter for the upstream quota.
//!
//! At most `limit` admissions per window, across all callers. A caller that
//! arrives with the window exhausted sleeps until the boundary and retries;
//! the window mutex is never held across the sleep, so waiters pile up on
//! the clock, not on the lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Snapshot of the limiter state for the metrics surface.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    /// Admissions consumed in the current window.
    pub current: u32,
    pub limit: u32,
    pub window_ms: u64,
    /// Milliseconds until the current window resets.
    pub reset_in_ms: u64,
}

/// Fixed-window limiter enforcing the upstream request quota.
pub struct RateLimiter {
    state: Mutex<WindowState>,
    limit: u32,
    window: Duration,
    admitted: AtomicU64,
    delayed: AtomicU64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
            limit: limit.max(1),
            window,
            admitted: AtomicU64::new(0),
            delayed: AtomicU64::new(0),
        }
    }

    /// Wait until an admission is available in the current window, then
    /// consume it. Never fails; callers are delayed, not rejected.
    pub async fn acquire(&self) {
        let mut delayed_once = false;
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.window_start);
                if elapsed >= self.window {
                    state.window_start = now;
                    state.count = 0;
                }

                if state.count < self.limit {
                    state.count += 1;
                    self.admitted.fetch_add(1, Ordering::Relaxed);
                    return;
                }

                self.window - now.duration_since(state.window_start)
            };

            if !delayed_once {
                delayed_once = true;
                self.delayed.fetch_add(1, Ordering::Relaxed);
                debug!(wait_ms = wait.as_millis() as u64, "rate window exhausted, waiting");
            }
            tokio::time::sleep(wait).await;
        }
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let (current, reset_in) = match self.state.try_lock() {
            Ok(state) => {
                let elapsed = state.window_start.elapsed();
                if elapsed >= self.window {
                    (0, Duration::ZERO)
                } else {
                    (state.count, self.window - elapsed)
                }
            }
            // Contended: report a full window rather than block the
            // metrics path.
            Err(_) => (self.limit, self.window),
        };
        RateLimitSnapshot {
            current,
            limit: self.limit,
            window_ms: self.window.as_millis() as u64,
            reset_in_ms: reset_in.as_millis() as u64,
        }
    }

    /// Total admissions since construction.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Callers that had to wait for a window boundary.
    pub fn delayed(&self) -> u64 {
        self.delayed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_limit_without_waiting() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.snapshot().current, 3);
        assert_eq!(limiter.delayed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_waits_for_the_window_boundary() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(limiter.delayed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_exceed_limit_per_window() {
        let limiter = Arc::new(RateLimiter::new(60, Duration::from_secs(60)));
        let t0 = Instant::now();

        let mut tasks = JoinSet::new();
        for _ in 0..120 {
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                limiter.acquire().await;
                Instant::now().duration_since(t0)
            });
        }

        let mut admissions = Vec::new();
        while let Some(result) = tasks.join_next().await {
            admissions.push(result.expect("task panicked"));
        }

        let first_window = admissions
            .iter()
            .filter(|at| **at < Duration::from_secs(60))
            .count();
        let second_window = admissions
            .iter()
            .filter(|at| **at >= Duration::from_secs(60) && **at < Duration::from_secs(120))
            .count();

        assert_eq!(admissions.len(), 120, "no caller fails");
        assert_eq!(first_window, 60);
        assert_eq!(second_window, 60);
    }
}
