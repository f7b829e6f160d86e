//! Availability planner: expands a (place, date) query into a bounded
//! fan-out plan and assembles the response tree.
//!
//! The tree's shape is a function of the clubs and courts responses only;
//! slot fetches fill it in and an exhausted slot branch materializes as an
//! empty sequence, never as an error or a hole.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::cache_manager::{EntryKind, TwoTierCache};
use crate::coalescer::RequestCoalescer;
use crate::error::FetchError;
use crate::models::{ClubAvailability, CourtAvailability};
use crate::upstream_client::CourtsClient;

/// Plans and executes availability queries.
pub struct AvailabilityPlanner {
    client: CourtsClient,
    coalescer: Arc<RequestCoalescer>,
    cache: Arc<TwoTierCache>,
    fan_out_courts: usize,
    fan_out_slots: usize,
}

impl AvailabilityPlanner {
    pub fn new(
        client: CourtsClient,
        coalescer: Arc<RequestCoalescer>,
        cache: Arc<TwoTierCache>,
        fan_out_courts: usize,
        fan_out_slots: usize,
    ) -> Self {
        Self {
            client,
            coalescer,
            cache,
            fan_out_courts,
            fan_out_slots,
        }
    }

    /// Hydrate the full clubs → courts → slots tree for a place and day.
    ///
    /// Order is preserved from the upstream clubs response and, per club,
    /// its courts response. A place with no reachable data (upstream down,
    /// breaker open, caches empty) yields an empty tree, not an error.
    pub async fn get_availability(
        &self,
        place_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ClubAvailability>, FetchError> {
        let clubs = match self.client.get_clubs(place_id).await {
            Ok(clubs) => clubs,
            Err(FetchError::NoCachedData { .. }) => {
                debug!(place_id, "no club data reachable, returning empty tree");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        // Courts per club, bounded fan-out, club order preserved. A club
        // whose courts cannot be produced contributes an empty court list.
        let court_tasks: Vec<_> = clubs
            .iter()
            .map(|club| {
                let client = self.client.clone();
                let club_id = club.id;
                move || async move {
                    match client.get_courts(club_id).await {
                        Ok(courts) => Ok(courts),
                        Err(FetchError::NoCachedData { .. }) => Ok(Vec::new()),
                        Err(e) => Err(e),
                    }
                }
            })
            .collect();
        let courts_by_club = self
            .coalescer
            .execute_concurrent(court_tasks, self.fan_out_courts)
            .await?;

        // Flat slot task list over clubs × courts, remembering where each
        // task's result belongs.
        let mut index = Vec::new();
        let mut slot_tasks = Vec::new();
        for (club_idx, (club, courts)) in clubs.iter().zip(&courts_by_club).enumerate() {
            for (court_idx, court) in courts.iter().enumerate() {
                index.push((club_idx, court_idx));
                let client = self.client.clone();
                let club_id = club.id;
                let court_id = court.id;
                slot_tasks.push(move || async move {
                    match client.get_available_slots(club_id, court_id, date).await {
                        Ok(slots) => Ok(slots),
                        Err(FetchError::NoCachedData { .. }) => Ok(Vec::new()),
                        Err(e) => Err(e),
                    }
                });
            }
        }
        let slots_flat = self
            .coalescer
            .execute_concurrent(slot_tasks, self.fan_out_slots)
            .await?;

        // Re-gather into the tree.
        let mut tree: Vec<ClubAvailability> = clubs
            .into_iter()
            .zip(courts_by_club)
            .map(|(club, courts)| ClubAvailability {
                club,
                courts: courts
                    .into_iter()
                    .map(|court| CourtAvailability {
                        court,
                        available: Vec::new(),
                    })
                    .collect(),
            })
            .collect();

        for ((club_idx, court_idx), slots) in index.into_iter().zip(slots_flat) {
            if let Some(entry) = tree
                .get_mut(club_idx)
                .and_then(|club| club.courts.get_mut(court_idx))
            {
                entry.available = slots;
            }
        }

        Ok(tree)
    }

    /// Drop composite availability entries for a place.
    ///
    /// With a date, only that day's pair is removed; without, every
    /// availability entry under the place goes, fresh and stale tiers both.
    pub async fn invalidate_place(&self, place_id: &str, date: Option<NaiveDate>) -> u64 {
        match date {
            Some(date) => {
                let day = date.format("%Y-%m-%d").to_string();
                let fresh = TwoTierCache::key(EntryKind::Availability, &[place_id, &day]);
                let stale = TwoTierCache::stale_key(EntryKind::Availability, &[place_id, &day]);
                self.cache.invalidate_pair(&fresh, &stale).await
            }
            None => {
                let fresh = self
                    .cache
                    .invalidate_by_pattern(&format!("availability:{place_id}:*"))
                    .await;
                let stale = self
                    .cache
                    .invalidate_by_pattern(&format!("availability:stale:{place_id}:*"))
                    .await;
                fresh + stale
            }
        }
    }
}
