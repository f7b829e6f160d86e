//! Redis key/value backend.
//!
//! Uses `ConnectionManager` so a dropped connection is re-established in the
//! background with bounded exponential backoff: 1 s initial delay, doubling
//! per attempt, capped at 5 attempts before the manager cools off.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::traits::KvBackend;

/// Initial reconnect delay in milliseconds.
const RECONNECT_BASE_MS: u64 = 1_000;
/// Delay multiplier between consecutive reconnect attempts.
const RECONNECT_EXPONENT: f32 = 2.0;
/// Reconnect attempts before the manager backs off for a cool-down.
const RECONNECT_MAX_ATTEMPTS: usize = 5;
/// Keys fetched per SCAN iteration.
const SCAN_COUNT: usize = 100;

/// Redis-backed [`KvBackend`].
pub struct RedisStore {
    conn_manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the initial
    /// connection (verified with `PING`) fails.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %url, "connecting key/value store");

        let client =
            Client::open(url).with_context(|| format!("invalid key/value store URL: {url}"))?;

        let config = ConnectionManagerConfig::new()
            .set_min_delay(Duration::from_millis(RECONNECT_BASE_MS))
            .set_exponent_base(RECONNECT_EXPONENT)
            .set_number_of_retries(RECONNECT_MAX_ATTEMPTS);

        let conn_manager = ConnectionManager::new_with_config(client, config)
            .await
            .context("failed to establish key/value store connection")?;

        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("key/value store PING failed")?;

        info!("key/value store connected");
        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl KvBackend for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn_manager.clone();
        // MGET with a single key folds the reply; keep the shape uniform.
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        Ok(cmd.query_async(&mut conn).await?)
    }

    async fn mset(&self, entries: &[(String, String, Duration)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        for (key, value, ttl) in entries {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl.as_secs())
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        Ok(conn.del(key).await?)
    }

    async fn del_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn_manager.clone();
        let removed: u64 = conn.del(keys).await?;
        debug!(count = removed, "bulk-removed keys");
        Ok(removed)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            // SCAN cursor MATCH pattern COUNT n: cursor-based, never blocks
            // the server the way KEYS would.
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            cursor = next;
            keys.extend(batch);

            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, found = keys.len(), "scanned keys");
        Ok(keys)
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
