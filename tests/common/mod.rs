//! Shared fixtures for the integration suite.
//!
//! The service is wired over an in-process store and a scripted upstream
//! transport, so every scenario (breaker trips and KV outages included)
//! runs deterministically without Redis or a network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courtside::backends::MemoryStore;
use courtside::{
    AvailabilityService, FetchError, KvBackend, Settings, UpstreamTransport, async_trait,
};
use serde_json::Value;

/// Install a tracing subscriber honoring `RUST_LOG`, once per binary.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Scripted upstream: explicit route table, per-path call counters, and a
/// failure switch that turns every call into a connection error.
#[derive(Default)]
pub struct ScriptedUpstream {
    routes: Mutex<HashMap<String, Value>>,
    calls: Mutex<HashMap<String, u32>>,
    failing: AtomicBool,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `path_and_query` to answer with `body`.
    pub fn route(&self, path_and_query: &str, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .insert(path_and_query.to_string(), body);
    }

    /// Make every call fail with a connection error (or stop doing so).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls observed for one path.
    pub fn calls(&self, path_and_query: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(path_and_query)
            .copied()
            .unwrap_or(0)
    }

    /// Calls observed across all paths.
    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedUpstream {
    async fn get_json(&self, path_and_query: &str) -> Result<Value, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(path_and_query.to_string())
            .or_insert(0) += 1;

        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Upstream("connection refused".to_string()));
        }

        match self.routes.lock().unwrap().get(path_and_query) {
            Some(body) => Ok(body.clone()),
            None => Err(FetchError::BadStatus {
                status: 404,
                body: format!("no route for {path_and_query}"),
            }),
        }
    }
}

/// Key/value backend where every operation fails, for outage scenarios.
pub struct FailingStore;

#[async_trait]
impl KvBackend for FailingStore {
    async fn get(&self, _: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("store unreachable")
    }
    async fn set(&self, _: &str, _: &str, _: Duration) -> anyhow::Result<()> {
        anyhow::bail!("store unreachable")
    }
    async fn mget(&self, _: &[String]) -> anyhow::Result<Vec<Option<String>>> {
        anyhow::bail!("store unreachable")
    }
    async fn mset(&self, _: &[(String, String, Duration)]) -> anyhow::Result<()> {
        anyhow::bail!("store unreachable")
    }
    async fn del(&self, _: &str) -> anyhow::Result<u64> {
        anyhow::bail!("store unreachable")
    }
    async fn del_many(&self, _: &[String]) -> anyhow::Result<u64> {
        anyhow::bail!("store unreachable")
    }
    async fn scan(&self, _: &str) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("store unreachable")
    }
    async fn flush(&self) -> anyhow::Result<()> {
        anyhow::bail!("store unreachable")
    }
    async fn ping(&self) -> bool {
        false
    }
    fn name(&self) -> &'static str {
        "failing"
    }
}

/// A wired service plus handles to its doubles.
pub struct TestHarness {
    pub service: AvailabilityService,
    pub upstream: Arc<ScriptedUpstream>,
    pub store: Arc<MemoryStore>,
}

pub async fn harness() -> TestHarness {
    harness_with(Settings::default()).await
}

pub async fn harness_with(settings: Settings) -> TestHarness {
    init_tracing();
    let upstream = Arc::new(ScriptedUpstream::new());
    let store = Arc::new(MemoryStore::new());
    let service = AvailabilityService::builder()
        .with_settings(settings)
        .with_store(Arc::clone(&store) as Arc<dyn KvBackend>)
        .with_transport(Arc::clone(&upstream) as Arc<dyn UpstreamTransport>)
        .build()
        .await
        .expect("service should build with injected backends");
    TestHarness {
        service,
        upstream,
        store,
    }
}

pub async fn harness_with_failing_store() -> (AvailabilityService, Arc<ScriptedUpstream>) {
    init_tracing();
    let upstream = Arc::new(ScriptedUpstream::new());
    let service = AvailabilityService::builder()
        .with_settings(Settings::default())
        .with_store(Arc::new(FailingStore))
        .with_transport(Arc::clone(&upstream) as Arc<dyn UpstreamTransport>)
        .build()
        .await
        .expect("service should build with injected backends");
    (service, upstream)
}

/// The standard scripted place: two clubs, three courts, one bookable slot.
///
/// Club 1 has court 10 (one slot on 2024-06-01); club 2 has courts 20 and 21
/// (no slots).
pub mod standard_place {
    use super::*;

    pub const PLACE: &str = "P";
    pub const DATE: &str = "2024-06-01";

    pub fn slot_json() -> Value {
        serde_json::json!({
            "price": 500.0,
            "duration": 60,
            "datetime": "2024-06-01T10:00:00Z",
            "start": "10:00",
            "end": "11:00",
            "_priority": 1
        })
    }

    pub fn seed(upstream: &ScriptedUpstream) {
        upstream.route(
            "/clubs?placeId=P",
            serde_json::json!([{"id": 1, "name": "Club Uno"}, {"id": 2, "name": "Club Dos"}]),
        );
        upstream.route("/clubs/1/courts", serde_json::json!([{"id": 10}]));
        upstream.route(
            "/clubs/2/courts",
            serde_json::json!([{"id": 20}, {"id": 21}]),
        );
        upstream.route(
            "/clubs/1/courts/10/slots?date=2024-06-01",
            serde_json::json!([slot_json()]),
        );
        upstream.route(
            "/clubs/2/courts/20/slots?date=2024-06-01",
            serde_json::json!([]),
        );
        upstream.route(
            "/clubs/2/courts/21/slots?date=2024-06-01",
            serde_json::json!([]),
        );
    }

    pub fn date() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
    }
}
