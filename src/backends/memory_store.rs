//! In-process key/value backend.
//!
//! A `DashMap` with per-entry expiry. Expired entries are dropped lazily on
//! read and can be reaped with [`MemoryStore::cleanup_expired`]. `scan`
//! matches glob patterns (`*`, `?`) against the live keyspace, so pattern
//! invalidation behaves the same here as against Redis.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::traits::KvBackend;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    expires_at: Instant,
}

impl StoredEntry {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// [`KvBackend`] over a concurrent in-process map.
#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, StoredEntry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of live (possibly expired, not yet reaped) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.map.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.map.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.map
            .insert(key.to_string(), StoredEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn mset(&self, entries: &[(String, String, Duration)]) -> Result<()> {
        for (key, value, ttl) in entries {
            self.set(key, value, *ttl).await?;
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        Ok(u64::from(self.map.remove(key).is_some()))
    }

    async fn del_many(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            removed += self.del(key).await?;
        }
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .map
            .iter()
            .filter(|entry| !entry.value().is_expired() && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn flush(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Glob match supporting `*` (any run) and `?` (any single character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < txt.len() {
        let p = pat.get(pi).copied();
        let t = txt.get(ti).copied();
        if p == Some('?') || (p.is_some() && p == t) {
            pi += 1;
            ti += 1;
        } else if p == Some('*') {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pat.get(pi).copied() == Some('*') {
        pi += 1;
    }
    pi == pat.len()
}
