use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::Result;
use crate::store::ListStore;

struct ListEntry {
    items: VecDeque<String>,
    expires_at: Option<Instant>,
}

impl ListEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process list store with Redis-like TTL behaviour. Expired keys are
/// dropped lazily on access. Uses tokio's clock so paused-time tests can
/// advance it.
#[derive(Default)]
pub struct MemoryListStore {
    lists: DashMap<String, ListEntry>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn evict_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.lists.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

/// Translate Redis-style (possibly negative) indices to a Rust range.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        self.lists.retain(|_, entry| !entry.is_expired(now));
        let mut keys: Vec<String> = self
            .lists
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.evict_if_expired(key);
        let Some(entry) = self.lists.get(key) else {
            return Ok(Vec::new());
        };
        let Some((from, to)) = resolve_range(entry.items.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(entry.items.range(from..=to).cloned().collect())
    }

    async fn push_front(&self, key: &str, values: &[String]) -> Result<()> {
        self.evict_if_expired(key);
        let mut entry = self.lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: VecDeque::new(),
            expires_at: None,
        });
        for value in values {
            entry.items.push_front(value.clone());
        }
        Ok(())
    }

    async fn push_front_with_ttl(&self, key: &str, values: &[String], ttl: Duration) -> Result<()> {
        self.evict_if_expired(key);
        // One entry guard covers both the push and the expiry.
        let mut entry = self.lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: VecDeque::new(),
            expires_at: None,
        });
        for value in values {
            entry.items.push_front(value.clone());
        }
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn len(&self, key: &str) -> Result<usize> {
        self.evict_if_expired(key);
        Ok(self.lists.get(key).map(|e| e.items.len()).unwrap_or(0))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.evict_if_expired(key);
        if let Some(mut entry) = self.lists.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.evict_if_expired(key);
        Ok(self
            .lists
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }
}
