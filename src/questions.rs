use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::store::ListStore;
use crate::types::GeneratedQuestion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuestionStats {
    pub count: usize,
    /// `None` when the list does not exist (or never expires).
    pub ttl_remaining_secs: Option<u64>,
}

/// Per-match question lists (`<prefix><matchId>`), newest first, expiring a
/// fixed time after the latest write.
pub struct QuestionStore {
    store: Arc<dyn ListStore>,
    prefix: String,
    ttl: Duration,
}

impl QuestionStore {
    pub fn new(store: Arc<dyn ListStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    pub fn key_for(&self, match_id: &str) -> String {
        format!("{}{}", self.prefix, match_id)
    }

    /// Push `questions` onto the match's list and reset its TTL. Failures are
    /// logged and reported as `false`.
    pub async fn append(&self, match_id: &str, questions: &[GeneratedQuestion]) -> bool {
        if questions.is_empty() {
            return true;
        }
        match self.try_append(match_id, questions).await {
            Ok(()) => {
                debug!(match_id, stored = questions.len(), "Stored questions");
                true
            }
            Err(e) => {
                error!(match_id, count = questions.len(), "Failed to store questions: {e}");
                false
            }
        }
    }

    async fn try_append(&self, match_id: &str, questions: &[GeneratedQuestion]) -> Result<()> {
        let key = self.key_for(match_id);
        let values = questions
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        // Reset, not extend: the list lives `ttl` past its most recent write.
        self.store.push_front_with_ttl(&key, &values, self.ttl).await
    }

    /// Up to `limit` most recent questions. Undecodable entries are skipped.
    pub async fn read_recent(
        &self,
        match_id: &str,
        limit: usize,
    ) -> Result<Vec<GeneratedQuestion>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = self.key_for(match_id);
        let raw = self.store.range(&key, 0, limit as isize - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str::<GeneratedQuestion>(entry) {
                Ok(q) => Some(q),
                Err(e) => {
                    warn!(key = %key, "Skipping undecodable stored question: {e}");
                    None
                }
            })
            .collect())
    }

    pub async fn stats(&self, match_id: &str) -> Result<QuestionStats> {
        let key = self.key_for(match_id);
        let count = self.store.len(&key).await?;
        let ttl = self.store.ttl(&key).await?;
        Ok(QuestionStats {
            count,
            ttl_remaining_secs: ttl.map(|d| d.as_secs()),
        })
    }
}
