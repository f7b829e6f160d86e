//! Key/value store adapter.
//!
//! Thin, *total* transport over a [`KvBackend`]: no operation here ever
//! returns an error. Backend failures degrade to `None` / `false` / no-op,
//! the `errors` counter moves, and the `connected` flag tracks the last
//! observed liveness so callers can report store health without probing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::traits::KvBackend;

/// Counter snapshot for the store adapter.
#[derive(Debug, Clone, Serialize)]
pub struct KvStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub operations: u64,
    pub connected: bool,
}

/// Total-operation adapter over a key/value backend.
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    operations: AtomicU64,
    connected: AtomicBool,
}

impl KvStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            connected: AtomicBool::new(true),
        }
    }

    fn observe_ok(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    fn observe_err(&self, op: &str, err: &anyhow::Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        warn!(op, backend = self.backend.name(), error = %err, "key/value operation failed");
    }

    /// Get `key`, or `None` when absent, expired or the backend failed.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                self.observe_ok();
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.observe_ok();
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.observe_err("get", &e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` at `key`. Returns whether the write was accepted.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.backend.set(key, value, ttl).await {
            Ok(()) => {
                self.observe_ok();
                debug!(key, ttl_secs = ttl.as_secs(), "cached key");
                true
            }
            Err(e) => {
                self.observe_err("set", &e);
                false
            }
        }
    }

    /// Get many keys, preserving order; a backend failure yields all-`None`.
    pub async fn mget(&self, keys: &[String]) -> Vec<Option<String>> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.backend.mget(keys).await {
            Ok(values) => {
                self.observe_ok();
                for value in &values {
                    if value.is_some() {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                    }
                }
                values
            }
            Err(e) => {
                self.observe_err("mget", &e);
                vec![None; keys.len()]
            }
        }
    }

    /// Store many entries. Returns whether the batch was accepted.
    pub async fn mset(&self, entries: &[(String, String, Duration)]) -> bool {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.backend.mset(entries).await {
            Ok(()) => {
                self.observe_ok();
                true
            }
            Err(e) => {
                self.observe_err("mset", &e);
                false
            }
        }
    }

    /// Delete `key`. Returns the number of keys removed (0 on failure).
    pub async fn del(&self, key: &str) -> u64 {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.backend.del(key).await {
            Ok(n) => {
                self.observe_ok();
                n
            }
            Err(e) => {
                self.observe_err("del", &e);
                0
            }
        }
    }

    /// Delete many keys. Returns the number removed (0 on failure).
    pub async fn del_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.backend.del_many(keys).await {
            Ok(n) => {
                self.observe_ok();
                n
            }
            Err(e) => {
                self.observe_err("del_many", &e);
                0
            }
        }
    }

    /// Enumerate keys matching a glob pattern; empty on failure.
    pub async fn scan(&self, pattern: &str) -> Vec<String> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.backend.scan(pattern).await {
            Ok(keys) => {
                self.observe_ok();
                keys
            }
            Err(e) => {
                self.observe_err("scan", &e);
                Vec::new()
            }
        }
    }

    /// Remove every key. Returns whether the flush was accepted.
    pub async fn flush(&self) -> bool {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.backend.flush().await {
            Ok(()) => {
                self.observe_ok();
                true
            }
            Err(e) => {
                self.observe_err("flush", &e);
                false
            }
        }
    }

    /// Last observed liveness of the backend.
    pub fn healthy(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Actively probe the backend and refresh the liveness flag.
    pub async fn probe(&self) -> bool {
        let alive = self.backend.ping().await;
        self.connected.store(alive, Ordering::Relaxed);
        alive
    }

    pub fn stats(&self) -> KvStats {
        KvStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}
