//! Courtside
//!
//! A read-through availability aggregator in front of a rate-limited courts
//! rental API, featuring:
//! - **Two-Tier Cache**: fresh entries with per-type TTLs plus a long-lived
//!   stale mirror for graceful degradation
//! - **Request Coalescing**: at most one in-flight upstream fetch per cache
//!   key, outcome shared by every waiter
//! - **Circuit Breaker**: three-state guard that diverts to the stale tier
//!   while the upstream is unhealthy
//! - **Rate Limiting**: fixed-window token accounting for the upstream quota
//! - **Selective Invalidation**: booking and metadata events translated into
//!   minimal cache deletions
//! - **Fan-Out Planner**: bounded-concurrency hydration of the full
//!   clubs → courts → slots tree
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use courtside::AvailabilityService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = AvailabilityService::from_env().await?;
//!
//!     let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//!     let tree = service.planner().get_availability("place-123", date).await?;
//!     println!("{} clubs with availability", tree.len());
//!
//!     let metrics = service.metrics();
//!     println!("cache hit rate: {:.2}%", metrics.cache.hit_rate);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Query → Planner → Client op → Breaker → Coalescer → Limiter → Upstream
//!                                  ↓ open / failure        ↘ on success
//!                            fresh → stale fallback      fresh + stale write
//! Event → Invalidation Engine → targeted cache deletions
//! ```

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

pub mod backends;
pub mod builder;
pub mod cache_manager;
pub mod circuit_breaker;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod kv_store;
pub mod models;
pub mod planner;
pub mod rate_limiter;
pub mod traits;
pub mod upstream_client;

pub use builder::AvailabilityServiceBuilder;
pub use cache_manager::{CacheStats, CachedRead, EntryKind, STALE_TTL, TwoTierCache};
pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use coalescer::RequestCoalescer;
pub use config::Settings;
pub use error::FetchError;
pub use invalidation::{CourtEvent, EventStats, InvalidationEngine};
pub use kv_store::{KvStats, KvStore};
pub use models::{Club, ClubAvailability, Court, CourtAvailability, Slot};
pub use planner::AvailabilityPlanner;
pub use rate_limiter::{RateLimitSnapshot, RateLimiter};
pub use traits::{KvBackend, UpstreamTransport};
pub use upstream_client::{ClientMetrics, CourtsClient, HttpTransport};

// Re-export async_trait for custom backend implementations.
pub use async_trait::async_trait;

/// Combined metrics surface; serialization format is the consumer's choice.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetrics {
    pub cache: CacheStats,
    pub breaker: BreakerSnapshot,
    pub events: EventStats,
    pub client: ClientMetrics,
}

/// Composition root: the fully wired availability aggregator.
pub struct AvailabilityService {
    settings: Settings,
    kv: Arc<KvStore>,
    cache: Arc<TwoTierCache>,
    client: CourtsClient,
    planner: AvailabilityPlanner,
    events: InvalidationEngine,
}

impl AvailabilityService {
    /// Build a service from environment configuration with the default
    /// Redis backend and HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or transport cannot be constructed.
    pub async fn from_env() -> Result<Self> {
        Self::builder()
            .with_settings(Settings::from_env())
            .build()
            .await
    }

    #[must_use]
    pub fn builder() -> AvailabilityServiceBuilder {
        AvailabilityServiceBuilder::new()
    }

    pub(crate) fn from_parts(
        settings: Settings,
        kv: Arc<KvStore>,
        cache: Arc<TwoTierCache>,
        client: CourtsClient,
        planner: AvailabilityPlanner,
        events: InvalidationEngine,
    ) -> Self {
        Self {
            settings,
            kv,
            cache,
            client,
            planner,
            events,
        }
    }

    /// Query path.
    pub fn planner(&self) -> &AvailabilityPlanner {
        &self.planner
    }

    /// Ingestion path.
    pub fn events(&self) -> &InvalidationEngine {
        &self.events
    }

    pub fn client(&self) -> &CourtsClient {
        &self.client
    }

    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.cache
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Actively probe the key/value backend and report overall liveness.
    ///
    /// The upstream is deliberately not probed: its health shows in the
    /// breaker state, and a probe would spend quota.
    pub async fn health_check(&self) -> bool {
        self.kv.probe().await
    }

    pub fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            cache: self.cache.stats(),
            breaker: self.client.breaker().snapshot(),
            events: self.events.stats(),
            client: self.client.metrics(),
        }
    }
}
