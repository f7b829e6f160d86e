//! Event-driven invalidation: booking events, scoped club updates, the
//! availability sweep, and idempotence.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use courtside::{CourtEvent, KvBackend, Settings, Slot};

const LONG_TTL: Duration = Duration::from_secs(7_200);

fn booking_slot(datetime: &str) -> Slot {
    serde_json::from_value(serde_json::json!({
        "price": 500.0,
        "duration": 60,
        "datetime": datetime,
        "start": "15:00",
        "end": "16:00",
        "_priority": 1
    }))
    .expect("valid slot")
}

async fn seed_keys(t: &TestHarness, keys: &[&str]) {
    for key in keys {
        t.store
            .set(key, "[]", LONG_TTL)
            .await
            .expect("seed entry");
    }
}

async fn assert_present(t: &TestHarness, key: &str) {
    assert!(
        t.store.get(key).await.expect("store read").is_some(),
        "'{key}' should still exist"
    );
}

async fn assert_absent(t: &TestHarness, key: &str) {
    assert!(
        t.store.get(key).await.expect("store read").is_none(),
        "'{key}' should have been invalidated"
    );
}

#[tokio::test]
async fn booking_event_removes_the_slot_day_and_sweeps_availability() {
    let settings = Settings {
        prefetch_place_ids: vec!["p1".to_string()],
        ..Settings::default()
    };
    let t = harness_with(settings).await;

    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let avail_fresh = format!("availability:p1:{today}");
    let avail_stale = format!("availability:stale:p1:{today}");
    seed_keys(
        &t,
        &[
            "slots:7:42:2024-06-02",
            "slots:stale:7:42:2024-06-02",
            "courts:7",
            "courts:stale:7",
            &avail_fresh,
            &avail_stale,
        ],
    )
    .await;

    t.service
        .events()
        .process(CourtEvent::BookingCreated {
            club_id: 7,
            court_id: 42,
            slot: booking_slot("2024-06-02T15:00:00Z"),
        })
        .await;

    assert_absent(&t, "slots:7:42:2024-06-02").await;
    assert_absent(&t, "slots:stale:7:42:2024-06-02").await;
    assert_present(&t, "courts:7").await;
    assert_present(&t, "courts:stale:7").await;
    assert_absent(&t, &avail_fresh).await;
    assert_absent(&t, &avail_stale).await;

    let stats = t.service.events().stats();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.errors, 0);
    assert!(stats.last_processed.is_some());
    assert_eq!(stats.success_rate, 100.0);
}

#[tokio::test]
async fn repeated_event_is_idempotent() {
    let t = harness().await;
    seed_keys(&t, &["slots:7:42:2024-06-02", "slots:stale:7:42:2024-06-02"]).await;

    let event = CourtEvent::BookingCancelled {
        club_id: 7,
        court_id: 42,
        slot: booking_slot("2024-06-02T15:00:00Z"),
    };
    t.service.events().process(event.clone()).await;
    t.service.events().process(event).await;

    assert_absent(&t, "slots:7:42:2024-06-02").await;
    assert_absent(&t, "slots:stale:7:42:2024-06-02").await;

    let stats = t.service.events().stats();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn booking_near_midnight_selects_the_utc_calendar_day() {
    let t = harness().await;
    seed_keys(
        &t,
        &[
            "slots:7:42:2024-06-01",
            "slots:stale:7:42:2024-06-01",
            "slots:7:42:2024-06-02",
            "slots:stale:7:42:2024-06-02",
        ],
    )
    .await;

    t.service
        .events()
        .process(CourtEvent::BookingCreated {
            club_id: 7,
            court_id: 42,
            slot: booking_slot("2024-06-01T23:59:59Z"),
        })
        .await;

    assert_absent(&t, "slots:7:42:2024-06-01").await;
    assert_present(&t, "slots:7:42:2024-06-02").await;

    t.service
        .events()
        .process(CourtEvent::BookingCreated {
            club_id: 7,
            court_id: 42,
            slot: booking_slot("2024-06-02T00:00:00Z"),
        })
        .await;
    assert_absent(&t, "slots:7:42:2024-06-02").await;
}

#[tokio::test]
async fn club_update_scopes_to_the_indexed_place() {
    let t = harness().await;
    seed_keys(
        &t,
        &[
            "clubs:P",
            "clubs:stale:P",
            "clubs:Q",
            "clubs:stale:Q",
            "courts:1",
            "courts:stale:1",
        ],
    )
    .await;
    // Club 1 was last listed under place P.
    t.store
        .set("clubToPlace:1", "P", LONG_TTL)
        .await
        .expect("seed index");

    t.service
        .events()
        .process(CourtEvent::ClubUpdated {
            club_id: 1,
            fields: vec!["attributes".to_string()],
        })
        .await;

    assert_absent(&t, "clubs:P").await;
    assert_absent(&t, "clubs:stale:P").await;
    assert_present(&t, "clubs:Q").await;
    assert_present(&t, "clubs:stale:Q").await;
    assert_absent(&t, "courts:1").await;
    assert_absent(&t, "courts:stale:1").await;
}

#[tokio::test]
async fn club_update_without_index_falls_back_to_global_invalidation() {
    let t = harness().await;
    seed_keys(
        &t,
        &["clubs:P", "clubs:stale:P", "clubs:Q", "slots:1:10:2024-06-01"],
    )
    .await;

    t.service
        .events()
        .process(CourtEvent::ClubUpdated {
            club_id: 99,
            fields: vec![],
        })
        .await;

    assert_absent(&t, "clubs:P").await;
    assert_absent(&t, "clubs:stale:P").await;
    assert_absent(&t, "clubs:Q").await;
    assert_present(&t, "slots:1:10:2024-06-01").await;
}

#[tokio::test]
async fn court_update_touches_only_the_club_courts() {
    let t = harness().await;
    seed_keys(
        &t,
        &[
            "courts:5",
            "courts:stale:5",
            "courts:6",
            "slots:5:50:2024-06-01",
        ],
    )
    .await;

    t.service
        .events()
        .process(CourtEvent::CourtUpdated {
            club_id: 5,
            court_id: 50,
            fields: vec!["name".to_string()],
        })
        .await;

    assert_absent(&t, "courts:5").await;
    assert_absent(&t, "courts:stale:5").await;
    assert_present(&t, "courts:6").await;
    assert_present(&t, "slots:5:50:2024-06-01").await;
}

#[tokio::test]
async fn unparseable_slot_datetime_is_counted_not_propagated() {
    let t = harness().await;
    seed_keys(&t, &["slots:7:42:2024-06-02"]).await;

    t.service
        .events()
        .process(CourtEvent::BookingCreated {
            club_id: 7,
            court_id: 42,
            slot: booking_slot("not-a-datetime"),
        })
        .await;

    // Nothing was deleted and the failure shows up in the counters only.
    assert_present(&t, "slots:7:42:2024-06-02").await;
    let stats = t.service.events().stats();
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test]
async fn planner_invalidation_scopes_by_place_and_day() {
    let t = harness().await;
    seed_keys(
        &t,
        &[
            "availability:p1:2024-06-01",
            "availability:stale:p1:2024-06-01",
            "availability:p1:2024-06-02",
            "availability:stale:p1:2024-06-02",
            "availability:p2:2024-06-01",
        ],
    )
    .await;

    let day = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date");
    t.service.planner().invalidate_place("p1", Some(day)).await;
    assert_absent(&t, "availability:p1:2024-06-01").await;
    assert_absent(&t, "availability:stale:p1:2024-06-01").await;
    assert_present(&t, "availability:p1:2024-06-02").await;
    assert_present(&t, "availability:p2:2024-06-01").await;

    t.service.planner().invalidate_place("p1", None).await;
    assert_absent(&t, "availability:p1:2024-06-02").await;
    assert_absent(&t, "availability:stale:p1:2024-06-02").await;
    assert_present(&t, "availability:p2:2024-06-01").await;
}

#[tokio::test]
async fn events_after_a_real_query_keep_the_warm_tree_consistent() {
    // End to end: hydrate, ingest a booking, re-query and see the slot
    // endpoint re-fetched while everything else stays cached.
    let t = harness().await;
    standard_place::seed(&t.upstream);

    t.service
        .planner()
        .get_availability(standard_place::PLACE, standard_place::date())
        .await
        .expect("first query");
    let slots_path = "/clubs/1/courts/10/slots?date=2024-06-01";
    assert_eq!(t.upstream.calls(slots_path), 1);

    // The booking empties the court for that day upstream.
    t.upstream
        .route(slots_path, serde_json::json!([]));
    t.service
        .events()
        .process(CourtEvent::BookingCreated {
            club_id: 1,
            court_id: 10,
            slot: booking_slot("2024-06-01T10:00:00Z"),
        })
        .await;

    let tree = t
        .service
        .planner()
        .get_availability(standard_place::PLACE, standard_place::date())
        .await
        .expect("second query");

    let club1 = tree.first().expect("club 1");
    assert!(
        club1.courts.first().expect("court 10").available.is_empty(),
        "the booked slot is gone after invalidation"
    );
    assert_eq!(t.upstream.calls(slots_path), 2, "slot entry was re-fetched");
    assert_eq!(t.upstream.calls("/clubs?placeId=P"), 1, "clubs stayed cached");
}
