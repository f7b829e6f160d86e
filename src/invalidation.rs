//! Event-driven cache invalidation.
//!
//! Ingested upstream mutation events are translated into a minimal set of
//! cache deletions. Processing never propagates a failure to the event
//! producer: errors are counted and logged, and the ingestion path stays
//! green.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache_manager::{EntryKind, TwoTierCache};
use crate::models::Slot;

/// Days of composite availability entries swept forward from today.
const AVAILABILITY_SWEEP_DAYS: u64 = 7;

/// Mutation events ingested from the upstream.
///
/// The discriminant travels in a `type` field. An unknown tag fails
/// deserialization at the ingestion boundary; the engine only ever sees
/// well-formed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CourtEvent {
    BookingCreated {
        #[serde(rename = "clubId")]
        club_id: i64,
        #[serde(rename = "courtId")]
        court_id: i64,
        slot: Slot,
    },
    BookingCancelled {
        #[serde(rename = "clubId")]
        club_id: i64,
        #[serde(rename = "courtId")]
        court_id: i64,
        slot: Slot,
    },
    ClubUpdated {
        #[serde(rename = "clubId")]
        club_id: i64,
        #[serde(default)]
        fields: Vec<String>,
    },
    CourtUpdated {
        #[serde(rename = "clubId")]
        club_id: i64,
        #[serde(rename = "courtId")]
        court_id: i64,
        #[serde(default)]
        fields: Vec<String>,
    },
}

/// Event processing counters.
#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    /// Events applied successfully.
    pub processed: u64,
    /// Events whose application failed.
    pub errors: u64,
    pub last_processed: Option<DateTime<Utc>>,
    pub success_rate: f64,
}

/// Translates events into cache mutations.
pub struct InvalidationEngine {
    cache: Arc<TwoTierCache>,
    /// Places whose composite availability entries are swept on every event.
    place_ids: Vec<String>,
    /// Offset of the upstream's calendar from UTC.
    tz: FixedOffset,
    processed: AtomicU64,
    errors: AtomicU64,
    last_processed: Mutex<Option<DateTime<Utc>>>,
}

impl InvalidationEngine {
    pub fn new(cache: Arc<TwoTierCache>, place_ids: Vec<String>, tz: FixedOffset) -> Self {
        Self {
            cache,
            place_ids,
            tz,
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_processed: Mutex::new(None),
        }
    }

    /// Apply an event's invalidations. Never fails; failures are counted.
    pub async fn process(&self, event: CourtEvent) {
        let outcome = self.apply(&event).await;
        *self.last_processed.lock() = Some(Utc::now());
        match outcome {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "event application failed");
            }
        }
    }

    async fn apply(&self, event: &CourtEvent) -> Result<()> {
        match event {
            CourtEvent::BookingCreated {
                club_id,
                court_id,
                slot,
            }
            | CourtEvent::BookingCancelled {
                club_id,
                court_id,
                slot,
            } => {
                let day = slot
                    .calendar_day(self.tz)
                    .ok_or_else(|| anyhow!("unparseable slot datetime '{}'", slot.datetime))?;
                self.invalidate_slots(*club_id, *court_id, day).await;
            }
            CourtEvent::ClubUpdated { club_id, .. } => {
                self.invalidate_clubs_for(*club_id).await;
                self.invalidate_courts(*club_id).await;
            }
            CourtEvent::CourtUpdated { club_id, .. } => {
                self.invalidate_courts(*club_id).await;
            }
        }

        self.sweep_availability().await;
        Ok(())
    }

    async fn invalidate_slots(&self, club_id: i64, court_id: i64, day: NaiveDate) {
        let club = club_id.to_string();
        let court = court_id.to_string();
        let date = day.format("%Y-%m-%d").to_string();
        let fresh = TwoTierCache::key(EntryKind::Slots, &[&club, &court, &date]);
        let stale = TwoTierCache::stale_key(EntryKind::Slots, &[&club, &court, &date]);
        let removed = self.cache.invalidate_pair(&fresh, &stale).await;
        debug!(key = %fresh, removed, "invalidated slot entries");
    }

    /// Clubs entries are scoped through the club → place reverse index;
    /// without an index entry the place is unknown and the whole clubs key
    /// space (both tiers) is invalidated.
    async fn invalidate_clubs_for(&self, club_id: i64) {
        match self.cache.place_for_club(club_id).await {
            Some(place) => {
                let fresh = TwoTierCache::key(EntryKind::Clubs, &[&place]);
                let stale = TwoTierCache::stale_key(EntryKind::Clubs, &[&place]);
                self.cache.invalidate_pair(&fresh, &stale).await;
            }
            None => {
                self.cache.invalidate_by_pattern("clubs:*").await;
            }
        }
    }

    async fn invalidate_courts(&self, club_id: i64) {
        let club = club_id.to_string();
        let fresh = TwoTierCache::key(EntryKind::Courts, &[&club]);
        let stale = TwoTierCache::stale_key(EntryKind::Courts, &[&club]);
        self.cache.invalidate_pair(&fresh, &stale).await;
    }

    /// Drop composite availability entries for every configured place over
    /// the forward sweep window starting today.
    async fn sweep_availability(&self) {
        if self.place_ids.is_empty() {
            return;
        }
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        let mut keys = Vec::new();
        for place in &self.place_ids {
            for offset in 0..AVAILABILITY_SWEEP_DAYS {
                let day = (today + Days::new(offset)).format("%Y-%m-%d").to_string();
                keys.push(TwoTierCache::key(EntryKind::Availability, &[place, &day]));
                keys.push(TwoTierCache::stale_key(
                    EntryKind::Availability,
                    &[place, &day],
                ));
            }
        }
        let removed = self.cache.invalidate_keys(&keys).await;
        if removed > 0 {
            debug!(removed, "swept composite availability entries");
        }
    }

    pub fn stats(&self) -> EventStats {
        let processed = self.processed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let total = processed + errors;
        EventStats {
            processed,
            errors,
            last_processed: *self.last_processed.lock(),
            success_rate: if total > 0 {
                #[allow(clippy::cast_precision_loss)]
                {
                    (processed as f64 / total as f64) * 100.0
                }
            } else {
                100.0
            },
        }
    }
}
