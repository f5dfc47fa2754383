//! List-shaped key/value storage shared by the event queues and the question
//! lists. Redis in production, an in-process map for tests and local runs.

pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryListStore;
pub use redis_store::RedisListStore;

#[async_trait]
pub trait ListStore: Send + Sync {
    /// All live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Inclusive index range, Redis LRANGE semantics. Never removes entries.
    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Insert values at the head, in order, so the last value ends up first.
    async fn push_front(&self, key: &str, values: &[String]) -> Result<()>;

    /// `push_front` and `expire` as one atomic step: either both apply or
    /// neither does.
    async fn push_front_with_ttl(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> Result<()>;

    async fn len(&self, key: &str) -> Result<usize>;

    /// Replace whatever expiry the key had with `ttl` from now.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remaining time to live. `None` when the key is missing or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}
