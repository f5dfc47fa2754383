use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::types::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Older than the age ceiling. Never recorded in the processed set.
    Stale,
    /// Already produced questions since the last clear.
    Duplicate,
}

/// Best-effort suppression of repeated events.
///
/// The processed set is wiped wholesale on a timer instead of expiring entries
/// individually. Anything still sitting in a queue after a wipe (and younger
/// than the age ceiling) is generated again: delivery is at-least-once.
pub struct EventDeduplicator {
    processed: Arc<Mutex<HashSet<String>>>,
    max_age: chrono::Duration,
}

impl EventDeduplicator {
    pub fn new(max_age_secs: i64) -> Self {
        Self {
            processed: Arc::new(Mutex::new(HashSet::new())),
            max_age: chrono::Duration::seconds(max_age_secs),
        }
    }

    /// Why `event` should be skipped, if at all. The age check wins over the
    /// set lookup.
    pub fn skip_reason(&self, event: &RawEvent, now: DateTime<Utc>) -> Option<SkipReason> {
        if now.signed_duration_since(event.timestamp) > self.max_age {
            return Some(SkipReason::Stale);
        }
        if self.lock().contains(&event.identity()) {
            return Some(SkipReason::Duplicate);
        }
        None
    }

    pub fn should_process(&self, event: &RawEvent, now: DateTime<Utc>) -> bool {
        self.skip_reason(event, now).is_none()
    }

    /// Call only once questions for `event` were generated and stored.
    pub fn mark_processed(&self, event: &RawEvent) {
        self.lock().insert(event.identity());
    }

    /// Drop every remembered identity. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut set = self.lock();
        let dropped = set.len();
        set.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Background task clearing the set every `every`. Runs independently of
    /// the sweep loop; abort the handle to stop it.
    pub fn spawn_clearer(&self, every: Duration) -> JoinHandle<()> {
        let processed = Arc::clone(&self.processed);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // consume immediate first tick, set starts empty

            loop {
                ticker.tick().await;
                let dropped = {
                    let mut set = processed.lock().unwrap_or_else(|p| p.into_inner());
                    let n = set.len();
                    set.clear();
                    n
                };
                if dropped > 0 {
                    info!(dropped, "Cleared processed-event set");
                } else {
                    debug!("Processed-event set already empty at clear");
                }
            }
        })
    }

    // A poisoned lock only means a panic mid-insert; the set is still usable.
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.processed.lock().unwrap_or_else(|p| p.into_inner())
    }
}
