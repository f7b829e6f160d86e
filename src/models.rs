//! Wire entities and the availability response tree.
//!
//! Upstream objects are opaque beyond the fields this crate routes on; the
//! remainder travels untouched through `#[serde(flatten)]` maps so a cached
//! payload round-trips byte-for-byte equivalent JSON.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A club as returned by `GET /clubs?placeId=…`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Club {
    pub id: i64,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// A court as returned by `GET /clubs/{clubId}/courts`.
///
/// The upstream does not always echo the owning club, so `club_id` is
/// optional on the wire; the client stamps it with the club the court was
/// fetched under, which is what makes the (clubId, id) identity hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Court {
    pub id: i64,
    #[serde(rename = "clubId", default, skip_serializing_if = "Option::is_none")]
    pub club_id: Option<i64>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// A bookable slot. Opaque to the core except for `datetime`, from which the
/// invalidation engine derives the calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub price: f64,
    pub duration: u32,
    pub datetime: String,
    pub start: String,
    pub end: String,
    #[serde(rename = "_priority", default)]
    pub priority: i32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Slot {
    /// Calendar day of this slot in the upstream's timezone.
    ///
    /// `datetime` is an ISO-8601 instant; the day is taken after shifting
    /// into the configured fixed offset (UTC by default), so instants near
    /// midnight land on the day the upstream's calendar assigns them.
    #[must_use]
    pub fn calendar_day(&self, tz: FixedOffset) -> Option<NaiveDate> {
        DateTime::parse_from_rfc3339(&self.datetime)
            .ok()
            .map(|dt| dt.with_timezone(&tz).date_naive())
    }
}

/// One court with its available slots for the queried day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourtAvailability {
    #[serde(flatten)]
    pub court: Court,
    pub available: Vec<Slot>,
}

/// One club with its courts, in upstream order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubAvailability {
    #[serde(flatten)]
    pub club: Club,
    pub courts: Vec<CourtAvailability>,
}
