//! Two-tier cache: fresh entries with per-type TTLs, stale mirrors with a
//! long uniform TTL.
//!
//! Every fresh write also writes the stale mirror, so a stale entry can
//! outlive its fresh counterpart. The stale tier exists only to back the
//! graceful-degradation path: invalidation removes fresh entries, and the
//! mirror keeps answering while the upstream is down.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::kv_store::{KvStats, KvStore};

/// Stale-tier TTL. Must be ≥ every fresh TTL.
pub const STALE_TTL: Duration = Duration::from_secs(7_200);

/// Key prefix of the club → place reverse index.
const CLUB_TO_PLACE: &str = "clubToPlace";

/// Cache entry types with their freshness bounds.
///
/// Freshness tightens with volatility: club metadata is near-static, slots
/// are the liveness surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Clubs under a place. Fresh for 1 hour.
    Clubs,
    /// Courts of a club. Fresh for 30 minutes.
    Courts,
    /// Slots of a court on a day. Fresh for 5 minutes.
    Slots,
    /// Reserved composite availability entries. Fresh for 3 minutes.
    Availability,
}

impl EntryKind {
    #[must_use]
    pub fn ttl(self) -> Duration {
        match self {
            Self::Clubs => Duration::from_secs(3_600),
            Self::Courts => Duration::from_secs(1_800),
            Self::Slots => Duration::from_secs(300),
            Self::Availability => Duration::from_secs(180),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clubs => "clubs",
            Self::Courts => "courts",
            Self::Slots => "slots",
            Self::Availability => "availability",
        }
    }
}

/// Result of a tiered read.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRead {
    pub data: Option<Value>,
    pub is_stale: bool,
}

impl CachedRead {
    const MISS: Self = Self {
        data: None,
        is_stale: false,
    };
}

/// Cache statistics, derived from the store adapter counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub operations: u64,
    pub hit_rate: f64,
    pub connected: bool,
}

/// The two-tier cache. Owns the key schema; every other component mutates
/// entries only through this contract.
pub struct TwoTierCache {
    kv: Arc<KvStore>,
}

impl TwoTierCache {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Fresh-tier key: `<type>:<p1>[:<p2>…]`.
    #[must_use]
    pub fn key(kind: EntryKind, params: &[&str]) -> String {
        format!("{}:{}", kind.as_str(), params.join(":"))
    }

    /// Stale-tier key: `<type>:stale:<p1>[:<p2>…]`.
    #[must_use]
    pub fn stale_key(kind: EntryKind, params: &[&str]) -> String {
        format!("{}:stale:{}", kind.as_str(), params.join(":"))
    }

    /// Read the fresh tier, falling back to the stale tier when a stale key
    /// is supplied.
    ///
    /// Store failures and undecodable payloads degrade to a miss; an
    /// undecodable entry is deleted so it cannot shadow future fallbacks.
    pub async fn get_with_fallback(&self, fresh_key: &str, stale_key: Option<&str>) -> CachedRead {
        if let Some(data) = self.read_entry(fresh_key).await {
            return CachedRead {
                data: Some(data),
                is_stale: false,
            };
        }

        if let Some(stale) = stale_key {
            if let Some(data) = self.read_entry(stale).await {
                debug!(key = fresh_key, "serving stale entry");
                return CachedRead {
                    data: Some(data),
                    is_stale: true,
                };
            }
        }

        CachedRead::MISS
    }

    async fn read_entry(&self, key: &str) -> Option<Value> {
        let raw = self.kv.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                self.kv.del(key).await;
                None
            }
        }
    }

    /// Write `data` to the fresh tier with the type's TTL and, iff a stale
    /// key is given, mirror the same payload into the stale tier.
    pub async fn set_with_intelligent_ttl(
        &self,
        fresh_key: &str,
        data: &Value,
        kind: EntryKind,
        stale_key: Option<&str>,
    ) {
        let payload = data.to_string();
        self.kv.set(fresh_key, &payload, kind.ttl()).await;
        if let Some(stale) = stale_key {
            self.kv.set(stale, &payload, STALE_TTL).await;
        }
    }

    /// Delete every key matching `pattern`.
    ///
    /// A literal key (no glob metacharacters) is deleted directly; a glob is
    /// enumerated with the backend's non-blocking scan and bulk-deleted. A
    /// pattern with no matches is a no-op. Returns the number of keys
    /// removed.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> u64 {
        if !pattern.contains('*') && !pattern.contains('?') {
            return self.kv.del(pattern).await;
        }

        let keys = self.kv.scan(pattern).await;
        if keys.is_empty() {
            debug!(pattern, "no keys matched invalidation pattern");
            return 0;
        }

        let removed = self.kv.del_many(&keys).await;
        debug!(pattern, removed, "invalidated keys by pattern");
        removed
    }

    /// Delete a fresh/stale key pair.
    pub async fn invalidate_pair(&self, fresh_key: &str, stale_key: &str) -> u64 {
        self.kv
            .del_many(&[fresh_key.to_string(), stale_key.to_string()])
            .await
    }

    /// Delete an explicit set of keys.
    pub async fn invalidate_keys(&self, keys: &[String]) -> u64 {
        self.kv.del_many(keys).await
    }

    /// Record which place a club was listed under. Written alongside every
    /// fresh clubs entry so club-scoped invalidation can be precise.
    pub async fn record_club_place(&self, club_id: i64, place_id: &str) {
        self.kv
            .set(&format!("{CLUB_TO_PLACE}:{club_id}"), place_id, STALE_TTL)
            .await;
    }

    /// Look up the place a club was last listed under.
    pub async fn place_for_club(&self, club_id: i64) -> Option<String> {
        self.kv.get(&format!("{CLUB_TO_PLACE}:{club_id}")).await
    }

    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    pub fn stats(&self) -> CacheStats {
        let kv = self.kv.stats();
        let hit_rate = if kv.hits + kv.misses > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                (kv.hits as f64 / (kv.hits + kv.misses) as f64) * 100.0
            }
        } else {
            0.0
        };
        let KvStats {
            hits,
            misses,
            errors,
            operations,
            connected,
        } = kv;
        CacheStats {
            hits,
            misses,
            errors,
            operations,
            hit_rate,
            connected,
        }
    }
}
