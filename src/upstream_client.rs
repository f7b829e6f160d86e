//! Typed operations against the courts rental upstream.
//!
//! Every operation follows one path: circuit breaker around a coalesced
//! fetch (fresh-cache short-circuit → rate limiter → HTTP GET → two-tier
//! write), with a fresh-then-stale cache read as the fallback. The three
//! operations differ only in their keys and URL.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache_manager::{EntryKind, TwoTierCache};
use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::coalescer::RequestCoalescer;
use crate::error::FetchError;
use crate::kv_store::KvStats;
use crate::models::{Club, Court, Slot};
use crate::rate_limiter::{RateLimitSnapshot, RateLimiter};
use crate::traits::UpstreamTransport;

/// HTTP transport over `reqwest`, with a single total timeout per call.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport for `base_url` with the given per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build upstream HTTP client")?;
        info!(base_url, timeout_ms = timeout.as_millis() as u64, "upstream transport ready");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn get_json(&self, path_and_query: &str) -> Result<Value, FetchError> {
        let url = format!("{}{path_and_query}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Upstream(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Upstream(format!(
                "upstream returned status {status}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Upstream(format!("undecodable upstream body: {e}")))
    }
}

/// Hook run inside the coalesced fetch after a fresh upstream response has
/// been stored, before the response is returned to waiters.
type UpstreamHook = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Combined metrics of the client and its collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetrics {
    pub breaker: BreakerSnapshot,
    pub kv: KvStats,
    pub rate_limit: RateLimitSnapshot,
}

/// Client for the courts rental upstream, layered on the cache fabric.
///
/// Cheap to clone; all state is shared behind `Arc`.
#[derive(Clone)]
pub struct CourtsClient {
    transport: Arc<dyn UpstreamTransport>,
    cache: Arc<TwoTierCache>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    coalescer: Arc<RequestCoalescer>,
}

impl CourtsClient {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        cache: Arc<TwoTierCache>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        coalescer: Arc<RequestCoalescer>,
    ) -> Self {
        Self {
            transport,
            cache,
            breaker,
            limiter,
            coalescer,
        }
    }

    /// Clubs available under a place.
    ///
    /// A fresh upstream response also records the club → place reverse index
    /// and schedules a background courts prefetch for every listed club.
    pub async fn get_clubs(&self, place_id: &str) -> Result<Vec<Club>, FetchError> {
        let fresh = TwoTierCache::key(EntryKind::Clubs, &[place_id]);
        let stale = TwoTierCache::stale_key(EntryKind::Clubs, &[place_id]);
        let path = format!("/clubs?placeId={place_id}");
        let hook = self.clubs_hook(place_id);

        let body = self
            .fetch_through(EntryKind::Clubs, fresh, stale, path, Some(hook))
            .await?;
        decode(body)
    }

    /// Courts of a club. Every returned court carries the club it was
    /// fetched under.
    pub async fn get_courts(&self, club_id: i64) -> Result<Vec<Court>, FetchError> {
        let id = club_id.to_string();
        let fresh = TwoTierCache::key(EntryKind::Courts, &[&id]);
        let stale = TwoTierCache::stale_key(EntryKind::Courts, &[&id]);
        let path = format!("/clubs/{club_id}/courts");

        let body = self
            .fetch_through(EntryKind::Courts, fresh, stale, path, None)
            .await?;
        let mut courts: Vec<Court> = decode(body)?;
        for court in &mut courts {
            court.club_id = Some(club_id);
        }
        Ok(courts)
    }

    /// Available slots of a court on a calendar day.
    pub async fn get_available_slots(
        &self,
        club_id: i64,
        court_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, FetchError> {
        let club = club_id.to_string();
        let court = court_id.to_string();
        let day = date.format("%Y-%m-%d").to_string();
        let fresh = TwoTierCache::key(EntryKind::Slots, &[&club, &court, &day]);
        let stale = TwoTierCache::stale_key(EntryKind::Slots, &[&club, &court, &day]);
        let path = format!("/clubs/{club_id}/courts/{court_id}/slots?date={day}");

        let body = self
            .fetch_through(EntryKind::Slots, fresh, stale, path, None)
            .await?;
        decode(body)
    }

    /// The shared read-through path.
    async fn fetch_through(
        &self,
        kind: EntryKind,
        fresh_key: String,
        stale_key: String,
        path: String,
        hook: Option<UpstreamHook>,
    ) -> Result<Value, FetchError> {
        let primary = || {
            let coalescer = Arc::clone(&self.coalescer);
            let cache = Arc::clone(&self.cache);
            let limiter = Arc::clone(&self.limiter);
            let transport = Arc::clone(&self.transport);
            let fresh = fresh_key.clone();
            let stale = stale_key.clone();
            let path = path.clone();
            let hook = hook.clone();

            async move {
                let key = fresh.clone();
                coalescer
                    .execute_batched(&key, move || async move {
                        // A fresh entry answers without consuming a token;
                        // this is also the double-check for callers that
                        // queued behind the fetch that populated it.
                        if let Some(data) = cache.get_with_fallback(&fresh, None).await.data {
                            return Ok(data);
                        }

                        limiter.acquire().await;
                        let body = transport.get_json(&path).await?;
                        cache
                            .set_with_intelligent_ttl(&fresh, &body, kind, Some(&stale))
                            .await;
                        if let Some(hook) = hook {
                            hook(body.clone()).await;
                        }
                        Ok(body)
                    })
                    .await
            }
        };

        let fallback = |cause: FetchError| {
            let cache = Arc::clone(&self.cache);
            let fresh = fresh_key.clone();
            let stale = stale_key.clone();

            async move {
                let read = cache.get_with_fallback(&fresh, Some(&stale)).await;
                match read.data {
                    Some(data) => {
                        if read.is_stale {
                            warn!(key = %fresh, cause = %cause, "serving stale data");
                        }
                        Ok(data)
                    }
                    None => Err(FetchError::NoCachedData { key: fresh }),
                }
            }
        };

        self.breaker.execute_with_fallback(primary, fallback).await
    }

    fn clubs_hook(&self, place_id: &str) -> UpstreamHook {
        let client = self.clone();
        let place = place_id.to_string();

        Arc::new(move |body: Value| {
            let client = client.clone();
            let place = place.clone();
            async move {
                let clubs: Vec<Club> = match serde_json::from_value(body) {
                    Ok(clubs) => clubs,
                    Err(e) => {
                        debug!(place = %place, error = %e, "skipping clubs post-processing");
                        return;
                    }
                };
                for club in &clubs {
                    client.cache.record_club_place(club.id, &place).await;
                }
                client.spawn_courts_prefetch(clubs);
            }
            .boxed()
        })
    }

    /// Warm the courts entries for freshly listed clubs.
    ///
    /// One sequential background worker per clubs response: prefetch shares
    /// the limiter and breaker with foreground traffic but can only ever
    /// occupy a single admission at a time.
    fn spawn_courts_prefetch(&self, clubs: Vec<Club>) {
        if clubs.is_empty() {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            for club in clubs {
                if let Err(e) = client.get_courts(club.id).await {
                    debug!(club_id = club.id, error = %e, "courts prefetch skipped");
                }
            }
        });
    }

    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn coalescer(&self) -> &Arc<RequestCoalescer> {
        &self.coalescer
    }

    pub fn metrics(&self) -> ClientMetrics {
        ClientMetrics {
            breaker: self.breaker.snapshot(),
            kv: self.cache.kv().stats(),
            rate_limit: self.limiter.snapshot(),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, FetchError> {
    serde_json::from_value(body).map_err(|e| FetchError::Serialization(e.to_string()))
}
