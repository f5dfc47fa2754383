use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::store::ListStore;
use crate::types::RawEvent;

/// Reads per-match event queues without consuming them. The queues are
/// retained logs owned upstream; only their own TTL bounds them.
pub struct EventQueueConsumer {
    store: Arc<dyn ListStore>,
    prefix: String,
}

impl EventQueueConsumer {
    pub fn new(store: Arc<dyn ListStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub async fn list_queue_keys(&self) -> Result<Vec<String>> {
        self.store.keys_with_prefix(&self.prefix).await
    }

    /// First `limit` records of the queue. Producers insert at the head, so
    /// this is newest-first, not chronological. Undecodable records are
    /// logged and dropped individually.
    pub async fn read_page(&self, key: &str, limit: usize) -> Result<Vec<RawEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self.store.range(key, 0, limit as isize - 1).await?;
        let total = raw.len();

        let events: Vec<RawEvent> = raw
            .into_iter()
            .enumerate()
            .filter_map(|(idx, record)| match serde_json::from_str::<RawEvent>(&record) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(queue = %key, index = idx, "Dropping undecodable event record: {e}");
                    None
                }
            })
            .collect();

        debug!(queue = %key, read = total, decoded = events.len(), "Read queue page");
        Ok(events)
    }

    /// Match id encoded in a queue key (`event:queue:<matchId>`).
    pub fn match_id_for<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }
}
