//! Service builder.
//!
//! Wires the component stack (store adapter, two-tier cache, rate limiter,
//! circuit breaker, coalescer, upstream client, planner, invalidation
//! engine) and lets callers swap the key/value backend or the upstream
//! transport for custom implementations such as embedded stores and test
//! doubles.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::AvailabilityService;
use crate::backends::RedisStore;
use crate::cache_manager::TwoTierCache;
use crate::circuit_breaker::CircuitBreaker;
use crate::coalescer::RequestCoalescer;
use crate::config::Settings;
use crate::invalidation::InvalidationEngine;
use crate::kv_store::KvStore;
use crate::planner::AvailabilityPlanner;
use crate::rate_limiter::RateLimiter;
use crate::traits::{KvBackend, UpstreamTransport};
use crate::upstream_client::{CourtsClient, HttpTransport};

/// Builder for [`AvailabilityService`].
///
/// Defaults: Redis at the configured address and HTTP against the configured
/// upstream base URL.
#[derive(Default)]
pub struct AvailabilityServiceBuilder {
    settings: Option<Settings>,
    store: Option<Arc<dyn KvBackend>>,
    transport: Option<Arc<dyn UpstreamTransport>>,
}

impl AvailabilityServiceBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Use a custom key/value backend instead of Redis.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn KvBackend>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom upstream transport instead of HTTP.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn UpstreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build and wire the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the default Redis backend or HTTP transport
    /// cannot be constructed (custom backends skip that step).
    pub async fn build(self) -> Result<AvailabilityService> {
        let settings = self.settings.unwrap_or_default();

        let store: Arc<dyn KvBackend> = match self.store {
            Some(store) => store,
            None => Arc::new(RedisStore::connect(&settings.kv_url()).await?),
        };
        let transport: Arc<dyn UpstreamTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                &settings.upstream_base_url,
                settings.upstream_timeout,
            )?),
        };

        let kv = Arc::new(KvStore::new(store));
        let cache = Arc::new(TwoTierCache::new(Arc::clone(&kv)));
        let limiter = Arc::new(RateLimiter::new(settings.rate_limit, settings.rate_window));
        let breaker = Arc::new(CircuitBreaker::new(
            settings.breaker_failure_threshold,
            settings.breaker_timeout,
            settings.breaker_success_threshold,
        ));
        let coalescer = Arc::new(RequestCoalescer::new());

        let client = CourtsClient::new(
            transport,
            Arc::clone(&cache),
            breaker,
            limiter,
            Arc::clone(&coalescer),
        );
        let planner = AvailabilityPlanner::new(
            client.clone(),
            coalescer,
            Arc::clone(&cache),
            settings.fan_out_courts,
            settings.fan_out_slots,
        );
        let events = InvalidationEngine::new(
            Arc::clone(&cache),
            settings.prefetch_place_ids.clone(),
            settings.upstream_tz(),
        );

        info!(
            rate_limit = settings.rate_limit,
            fan_out_courts = settings.fan_out_courts,
            fan_out_slots = settings.fan_out_slots,
            "availability service wired"
        );

        Ok(AvailabilityService::from_parts(
            settings, kv, cache, client, planner, events,
        ))
    }
}
