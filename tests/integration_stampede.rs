//! Coalescing under concurrent load: many identical queries against a cold
//! cache collapse to one upstream fetch per cache key.

mod common;

use std::sync::Arc;

use common::standard_place::{self, PLACE};
use common::*;
use tokio::task::JoinSet;

#[tokio::test]
async fn concurrent_cold_queries_coalesce_per_key() {
    let t = Arc::new(harness().await);
    standard_place::seed(&t.upstream);

    let mut tasks = JoinSet::new();
    for _ in 0..50 {
        let t = Arc::clone(&t);
        tasks.spawn(async move {
            t.service
                .planner()
                .get_availability(PLACE, standard_place::date())
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        let tree = result.expect("task panicked").expect("query failed");
        assert_eq!(tree.len(), 2, "every caller sees the full tree");
    }

    assert_eq!(
        t.upstream.calls("/clubs?placeId=P"),
        1,
        "clubs fetched exactly once"
    );
    for path in ["/clubs/1/courts", "/clubs/2/courts"] {
        assert_eq!(t.upstream.calls(path), 1, "'{path}' fetched exactly once");
    }
    for path in [
        "/clubs/1/courts/10/slots?date=2024-06-01",
        "/clubs/2/courts/20/slots?date=2024-06-01",
        "/clubs/2/courts/21/slots?date=2024-06-01",
    ] {
        assert_eq!(t.upstream.calls(path), 1, "'{path}' fetched exactly once");
    }

    // 1 clubs + |clubs| courts + Σ|courts| slots.
    assert_eq!(t.upstream.total_calls(), 6);
}

#[tokio::test]
async fn concurrent_queries_for_distinct_places_do_not_share_fetches() {
    let t = Arc::new(harness().await);
    t.upstream.route("/clubs?placeId=a", serde_json::json!([]));
    t.upstream.route("/clubs?placeId=b", serde_json::json!([]));

    let mut tasks = JoinSet::new();
    for place in ["a", "b"] {
        for _ in 0..10 {
            let t = Arc::clone(&t);
            tasks.spawn(async move {
                t.service
                    .planner()
                    .get_availability(place, standard_place::date())
                    .await
            });
        }
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("task panicked").expect("query failed");
    }

    assert_eq!(t.upstream.calls("/clubs?placeId=a"), 1);
    assert_eq!(t.upstream.calls("/clubs?placeId=b"), 1);
}
