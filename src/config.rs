//! Environment-driven configuration.
//!
//! Every knob has a production default; unparseable or out-of-range values
//! fall back rather than abort, so a half-configured environment still boots.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Runtime settings for the availability service.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Key/value store connection.
    pub kv_host: String,
    pub kv_port: u16,
    pub kv_password: Option<String>,
    pub kv_db: u32,

    /// Base URL of the courts rental upstream.
    pub upstream_base_url: String,
    /// Per-call timeout for upstream requests (connect + read).
    pub upstream_timeout: Duration,

    /// Upstream quota: at most `rate_limit` calls per `rate_window`.
    pub rate_limit: u32,
    pub rate_window: Duration,

    /// Circuit breaker thresholds.
    pub breaker_failure_threshold: u32,
    pub breaker_timeout: Duration,
    pub breaker_success_threshold: u32,

    /// Reserved grouping delay for batched coalescing.
    pub coalesce_batch_delay: Duration,

    /// Fan-out widths for the availability planner.
    pub fan_out_courts: usize,
    pub fan_out_slots: usize,

    /// Places whose composite availability entries are swept on every event.
    pub prefetch_place_ids: Vec<String>,

    /// Offset of the upstream's calendar from UTC, in minutes.
    pub tz_offset_minutes: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kv_host: "localhost".to_string(),
            kv_port: 6379,
            kv_password: None,
            kv_db: 0,
            upstream_base_url: "http://localhost:4000".to_string(),
            upstream_timeout: Duration::from_secs(10),
            rate_limit: 60,
            rate_window: Duration::from_millis(60_000),
            breaker_failure_threshold: 5,
            breaker_timeout: Duration::from_millis(60_000),
            breaker_success_threshold: 3,
            coalesce_batch_delay: Duration::from_millis(50),
            fan_out_courts: 5,
            fan_out_slots: 10,
            prefetch_place_ids: Vec::new(),
            tz_offset_minutes: 0,
        }
    }
}

impl Settings {
    /// Read settings from the environment, falling back to defaults for any
    /// missing or malformed value.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            kv_host: std::env::var("KV_HOST").unwrap_or(default.kv_host),
            kv_port: env_parsed("KV_PORT").unwrap_or(default.kv_port),
            kv_password: std::env::var("KV_PASSWORD").ok().filter(|p| !p.is_empty()),
            kv_db: env_parsed("KV_DB").unwrap_or(default.kv_db),
            upstream_base_url: std::env::var("UPSTREAM_BASE_URL")
                .unwrap_or(default.upstream_base_url),
            upstream_timeout: env_parsed::<u64>("UPSTREAM_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map_or(default.upstream_timeout, Duration::from_millis),
            rate_limit: env_parsed::<u32>("RATE_LIMIT")
                .filter(|n| *n > 0)
                .unwrap_or(default.rate_limit),
            rate_window: env_parsed::<u64>("RATE_WINDOW_MS")
                .filter(|ms| *ms > 0)
                .map_or(default.rate_window, Duration::from_millis),
            breaker_failure_threshold: env_parsed::<u32>("BREAKER_FAILURE_THRESHOLD")
                .filter(|n| *n > 0)
                .unwrap_or(default.breaker_failure_threshold),
            breaker_timeout: env_parsed::<u64>("BREAKER_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map_or(default.breaker_timeout, Duration::from_millis),
            breaker_success_threshold: env_parsed::<u32>("BREAKER_SUCCESS_THRESHOLD")
                .filter(|n| *n > 0)
                .unwrap_or(default.breaker_success_threshold),
            coalesce_batch_delay: env_parsed::<u64>("COALESCE_BATCH_DELAY_MS")
                .map_or(default.coalesce_batch_delay, Duration::from_millis),
            fan_out_courts: env_parsed::<usize>("FAN_OUT_COURTS")
                .filter(|n| *n > 0)
                .unwrap_or(default.fan_out_courts),
            fan_out_slots: env_parsed::<usize>("FAN_OUT_SLOTS")
                .filter(|n| *n > 0)
                .unwrap_or(default.fan_out_slots),
            prefetch_place_ids: std::env::var("PREFETCH_PLACE_IDS")
                .map(|raw| parse_place_ids(&raw))
                .unwrap_or(default.prefetch_place_ids),
            tz_offset_minutes: env_parsed("UPSTREAM_TZ_OFFSET_MINUTES")
                .unwrap_or(default.tz_offset_minutes),
        }
    }

    /// Connection URL for the key/value store.
    #[must_use]
    pub fn kv_url(&self) -> String {
        match &self.kv_password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.kv_host, self.kv_port, self.kv_db
            ),
            None => format!("redis://{}:{}/{}", self.kv_host, self.kv_port, self.kv_db),
        }
    }

    /// Fixed offset of the upstream's calendar, clamped to a valid offset.
    #[must_use]
    pub fn upstream_tz(&self) -> FixedOffset {
        FixedOffset::east_opt(self.tz_offset_minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
    }
}

/// `PREFETCH_PLACE_IDS` accepts either a JSON array (`["a","b"]`) or a
/// comma-separated list (`a,b`).
fn parse_place_ids(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('[') {
        if let Ok(ids) = serde_json::from_str::<Vec<String>>(trimmed) {
            return ids;
        }
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
