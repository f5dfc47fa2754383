use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{EventType, PredictionSet, RawEvent};

/// Prune expired entries once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub match_id: String,
    pub event_type: EventType,
    pub timestamp_ms: i64,
}

impl CacheKey {
    pub fn for_event(event: &RawEvent) -> Self {
        Self {
            match_id: event.match_id.clone(),
            event_type: event.event_type,
            timestamp_ms: event.timestamp.timestamp_millis(),
        }
    }
}

struct CachedPredictions {
    predictions: PredictionSet,
    written_at: Instant,
}

/// Short-lived prediction responses per event. Owned by a single pipeline,
/// so no locking.
pub struct PredictionCache {
    entries: HashMap<CacheKey, CachedPredictions>,
    ttl: Duration,
}

impl PredictionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Entries older than the TTL count as absent and are evicted.
    pub fn get(&mut self, key: &CacheKey) -> Option<&PredictionSet> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.written_at.elapsed() >= self.ttl);
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.predictions)
    }

    pub fn insert(&mut self, key: CacheKey, predictions: PredictionSet) {
        if self.entries.len() >= PRUNE_THRESHOLD {
            self.prune();
        }
        self.entries.insert(
            key,
            CachedPredictions {
                predictions,
                written_at: Instant::now(),
            },
        );
    }

    pub fn prune(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.written_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PredictionOutput, TargetPrediction};

    fn key(ts: i64) -> CacheKey {
        CacheKey {
            match_id: "m1".to_string(),
            event_type: EventType::Boundary,
            timestamp_ms: ts,
        }
    }

    fn set(confidence: f64) -> PredictionSet {
        let mut set = PredictionSet::new();
        set.insert(
            "boundary_probability".to_string(),
            TargetPrediction {
                model_type: "best".to_string(),
                prediction: PredictionOutput {
                    prediction: 1.0,
                    probabilities: vec![1.0 - confidence, confidence],
                    confidence: Some(confidence),
                },
            },
        );
        set
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let mut cache = PredictionCache::new(Duration::from_secs(30));
        cache.insert(key(1), set(0.8));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get(&key(1)), Some(&set(0.8)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key(1)), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_differ_by_timestamp() {
        let mut cache = PredictionCache::new(Duration::from_secs(30));
        cache.insert(key(1), set(0.8));
        assert!(cache.get(&key(2)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_only_expired() {
        let mut cache = PredictionCache::new(Duration::from_secs(30));
        cache.insert(key(1), set(0.8));
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.insert(key(2), set(0.6));

        cache.prune();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key(2)).is_some());
    }
}
