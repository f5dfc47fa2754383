use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::error::Result;
use crate::store::ListStore;

/// Keys fetched per SCAN round trip.
const SCAN_COUNT: usize = 200;

/// Redis-backed list store. `ConnectionManager` reconnects on its own and is
/// cheap to clone, so each call works on its own handle.
#[derive(Clone)]
pub struct RedisListStore {
    manager: ConnectionManager,
}

impl RedisListStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("Redis connection ready at {redis_url}");
        Ok(Self { manager })
    }
}

#[async_trait]
impl ListStore for RedisListStore {
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // Cursor-based SCAN, never KEYS.
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }

    async fn push_front(&self, key: &str, values: &[String]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let _: () = conn.lpush(key, values).await?;
        Ok(())
    }

    async fn push_front_with_ttl(&self, key: &str, values: &[String], ttl: Duration) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        // MULTI/EXEC: the list never exists without its TTL.
        let _: () = redis::pipe()
            .atomic()
            .lpush(key, values)
            .ignore()
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let mut conn = self.manager.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();
        // -2 = missing key, -1 = no expiry.
        let secs: i64 = conn.ttl(key).await?;
        Ok((secs >= 0).then(|| Duration::from_secs(secs as u64)))
    }
}
