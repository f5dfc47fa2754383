use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::latency::LatencyStats;
use crate::config::{
    Config, DEDUP_CLEAR_INTERVAL_SECS, EVENT_QUEUE_PREFIX, HEALTH_PROBE_INTERVAL_SECS,
    MAX_EVENT_AGE_SECS, QUESTION_TTL_SECS, SWEEP_INTERVAL_SECS,
};
use crate::error::Result;
use crate::features::{FeatureExtractor, MatchContext};
use crate::prediction::PredictionClient;
use crate::queue::{EventDeduplicator, EventQueueConsumer, SkipReason};
use crate::questions::QuestionStore;
use crate::store::ListStore;
use crate::templates::{
    contains_placeholder_token, PlaceholderResolver, TemplateCatalog, TemplateSelector,
};
use crate::types::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Stopped => "stopped",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

/// Counters for one pass over every queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub queues: usize,
    pub events_read: usize,
    pub stale_skipped: usize,
    pub duplicate_skipped: usize,
    pub without_templates: usize,
    pub questions_generated: usize,
    pub event_failures: usize,
}

/// What happened to a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Skipped(SkipReason),
    /// No eligible template. Not marked, so the next sweep tries again.
    NoTemplates,
    Generated(usize),
    /// Questions were built but could not be stored. Not marked.
    StoreFailed,
}

/// Drives the event-to-question pipeline: one sequential sweep over all match
/// queues per tick. Owns the processed-event set and the prediction cache.
pub struct Orchestrator {
    consumer: EventQueueConsumer,
    dedup: EventDeduplicator,
    extractor: FeatureExtractor,
    predictions: PredictionClient,
    catalog: TemplateCatalog,
    selector: TemplateSelector,
    resolver: PlaceholderResolver,
    questions: Arc<QuestionStore>,
    ml_enabled: bool,
    page_size: usize,
    state: Arc<watch::Sender<PipelineState>>,
}

impl Orchestrator {
    pub fn new(
        cfg: &Config,
        store: Arc<dyn ListStore>,
        catalog: TemplateCatalog,
        latency: Arc<LatencyStats>,
    ) -> Result<Self> {
        let questions = QuestionStore::new(
            Arc::clone(&store),
            cfg.questions_prefix(),
            Duration::from_secs(QUESTION_TTL_SECS),
        );
        let (state, _) = watch::channel(PipelineState::Stopped);
        Ok(Self {
            consumer: EventQueueConsumer::new(store, EVENT_QUEUE_PREFIX),
            dedup: EventDeduplicator::new(MAX_EVENT_AGE_SECS),
            extractor: FeatureExtractor::new(),
            predictions: PredictionClient::new(cfg, latency)?,
            catalog,
            selector: TemplateSelector::new(),
            resolver: PlaceholderResolver::new(),
            questions: Arc::new(questions),
            ml_enabled: cfg.ml_enabled,
            page_size: cfg.queue_page_size,
            state: Arc::new(state),
        })
    }

    pub fn question_store(&self) -> Arc<QuestionStore> {
        Arc::clone(&self.questions)
    }

    pub fn prediction_health(&self) -> Arc<AtomicBool> {
        self.predictions.health_flag()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Probe the prediction service once, start the side tasks and spawn the
    /// sweep loop. Resolves once the pipeline is `Running`.
    pub async fn start(self) -> OrchestratorHandle {
        self.state.send_replace(PipelineState::Starting);
        info!(
            ml_enabled = self.ml_enabled,
            templates = self.catalog.len(),
            page_size = self.page_size,
            "Starting question pipeline"
        );

        self.dedup.clear();
        let mut side_tasks = vec![self
            .dedup
            .spawn_clearer(Duration::from_secs(DEDUP_CLEAR_INTERVAL_SECS))];
        if self.ml_enabled {
            if !self.predictions.check_health().await {
                warn!("Prediction service unavailable at startup, questions will use fallbacks");
            }
            side_tasks.push(
                self.predictions
                    .spawn_health_probe(Duration::from_secs(HEALTH_PROBE_INTERVAL_SECS)),
            );
        }

        let state = Arc::clone(&self.state);
        state.send_replace(PipelineState::Running);
        let task = tokio::spawn(self.run(side_tasks));
        OrchestratorHandle { state, task }
    }

    async fn run(mut self, side_tasks: Vec<JoinHandle<()>>) {
        let mut state_rx = self.state.subscribe();
        let pause = Duration::from_secs(SWEEP_INTERVAL_SECS);

        loop {
            if *self.state.borrow() == PipelineState::Stopping {
                break;
            }

            let stats = self.run_sweep(Utc::now()).await;
            if stats.questions_generated > 0 || stats.event_failures > 0 {
                info!(
                    queues = stats.queues,
                    events = stats.events_read,
                    questions = stats.questions_generated,
                    failures = stats.event_failures,
                    "Sweep complete"
                );
            } else {
                debug!(
                    queues = stats.queues,
                    events = stats.events_read,
                    stale = stats.stale_skipped,
                    duplicates = stats.duplicate_skipped,
                    "Sweep complete, nothing new"
                );
            }

            // A stop request cuts the pause short.
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = state_rx.changed() => {}
            }
        }

        for task in side_tasks {
            task.abort();
        }
        let state = Arc::clone(&self.state);
        drop(self);
        state.send_replace(PipelineState::Stopped);
        info!("Question pipeline stopped");
    }

    /// One pass over every queue. Queue and event failures are logged and
    /// counted; nothing escapes.
    pub async fn run_sweep(&mut self, now: DateTime<Utc>) -> SweepStats {
        let mut stats = SweepStats::default();

        let keys = match self.consumer.list_queue_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!("Failed to list event queues: {e}");
                return stats;
            }
        };
        stats.queues = keys.len();

        for key in &keys {
            let events = match self.consumer.read_page(key, self.page_size).await {
                Ok(events) => events,
                Err(e) => {
                    error!(queue = %key, "Failed to read event queue: {e}");
                    continue;
                }
            };
            stats.events_read += events.len();
            let match_id = self.consumer.match_id_for(key).to_string();

            for event in &events {
                match self.process_event(&match_id, event, now).await {
                    EventOutcome::Skipped(SkipReason::Stale) => stats.stale_skipped += 1,
                    EventOutcome::Skipped(SkipReason::Duplicate) => stats.duplicate_skipped += 1,
                    EventOutcome::NoTemplates => stats.without_templates += 1,
                    EventOutcome::Generated(n) => stats.questions_generated += n,
                    EventOutcome::StoreFailed => stats.event_failures += 1,
                }
            }
        }
        stats
    }

    /// Dedup, predict, select, resolve, store, and mark, for one event.
    pub async fn process_event(
        &mut self,
        match_id: &str,
        event: &RawEvent,
        now: DateTime<Utc>,
    ) -> EventOutcome {
        if let Some(reason) = self.dedup.skip_reason(event, now) {
            debug!(match_id, event_type = %event.event_type, ?reason, "Skipping event");
            return EventOutcome::Skipped(reason);
        }

        let templates = self.catalog.templates_for(event.event_type);
        if templates.is_empty() {
            debug!(match_id, event_type = %event.event_type, "No templates for event type");
            return EventOutcome::NoTemplates;
        }

        let targets = self.catalog.targets_for(event.event_type);
        let predictions = if self.ml_enabled && !targets.is_empty() {
            let features = self
                .extractor
                .extract(event, &MatchContext::from_event(event));
            let result = self
                .predictions
                .predictions_for_event(event, &features, &targets)
                .await;
            if result.is_none() {
                debug!(match_id, event_type = %event.event_type, "No predictions, using fallbacks");
            }
            result
        } else {
            None
        };

        let selections = self.selector.select(templates, predictions.as_ref());
        if selections.is_empty() {
            debug!(
                match_id,
                event_type = %event.event_type,
                "Every template excluded by confidence gates"
            );
            return EventOutcome::NoTemplates;
        }

        let generated_at = Utc::now();
        let questions: Vec<_> = selections
            .iter()
            .map(|selection| self.resolver.resolve(match_id, event, selection, generated_at))
            .collect();
        debug_assert!(questions
            .iter()
            .all(|q| !contains_placeholder_token(&q.question_text)));

        if !self.questions.append(match_id, &questions).await {
            return EventOutcome::StoreFailed;
        }
        self.dedup.mark_processed(event);

        let enhanced = questions.iter().filter(|q| q.ml_enhanced).count();
        info!(
            match_id,
            event_type = %event.event_type,
            questions = questions.len(),
            enhanced,
            "Generated questions"
        );
        EventOutcome::Generated(questions.len())
    }
}

/// Control side of a started pipeline.
pub struct OrchestratorHandle {
    state: Arc<watch::Sender<PipelineState>>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Request `Stopping` and wait for the in-flight sweep to finish.
    pub async fn stop(self) {
        info!("Stopping question pipeline");
        self.state.send_replace(PipelineState::Stopping);
        if let Err(e) = self.task.await {
            error!("Pipeline task ended abnormally: {e}");
            self.state.send_replace(PipelineState::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::client::tests::{spawn_fake_service, unreachable_url};
    use crate::error::AppError;
    use crate::store::MemoryListStore;
    use crate::types::GeneratedQuestion;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    const QUEUE: &str = "event:queue:m1";

    async fn orchestrator(cfg: Config) -> (Orchestrator, Arc<MemoryListStore>) {
        let store = Arc::new(MemoryListStore::new());
        let catalog = TemplateCatalog::baseline().unwrap();
        let orchestrator =
            Orchestrator::new(&cfg, store.clone(), catalog, Arc::new(LatencyStats::new())).unwrap();
        (orchestrator, store)
    }

    async fn offline_orchestrator() -> (Orchestrator, Arc<MemoryListStore>) {
        let mut cfg = Config::for_tests();
        cfg.prediction_url = unreachable_url().await;
        orchestrator(cfg).await
    }

    async fn online_orchestrator(confidence: f64) -> (Orchestrator, Arc<MemoryListStore>) {
        let (url, _) = spawn_fake_service("healthy", confidence).await;
        let mut cfg = Config::for_tests();
        cfg.prediction_url = url;
        let (orchestrator, store) = orchestrator(cfg).await;
        assert!(orchestrator.predictions.check_health().await);
        (orchestrator, store)
    }

    fn event(event_type: &str, at: DateTime<Utc>) -> Value {
        json!({
            "type": event_type,
            "matchId": "m1",
            "timestamp": at.timestamp_millis(),
            "batsman": "Virat Kohli",
            "bowler": "Pat Cummins",
            "runs": 4,
            "over": 12
        })
    }

    async fn enqueue(store: &MemoryListStore, record: Value) {
        store.push_front(QUEUE, &[record.to_string()]).await.unwrap();
    }

    async fn stored(orchestrator: &Orchestrator) -> Vec<GeneratedQuestion> {
        orchestrator.questions.read_recent("m1", 100).await.unwrap()
    }

    #[tokio::test]
    async fn boundary_without_prediction_service_uses_fallbacks() {
        let (mut orchestrator, store) = offline_orchestrator().await;
        let now = Utc::now();
        enqueue(&store, event("boundary", now)).await;

        let stats = orchestrator.run_sweep(now).await;
        assert_eq!(stats.questions_generated, 4);

        let questions = stored(&orchestrator).await;
        assert_eq!(questions.len(), 4);
        for q in &questions {
            assert!(!q.ml_enhanced);
            assert!(q.question_text.contains("Virat Kohli"), "{}", q.question_text);
            assert!(!contains_placeholder_token(&q.question_text));
            assert!(!q.question_text.contains('{'));
            assert_eq!(q.match_id, "m1");
        }
        assert!(questions.iter().any(|q| q.question_text.contains("Confidence: 60%")));
    }

    #[tokio::test]
    async fn confident_prediction_enhances_gated_template() {
        let (mut orchestrator, store) = online_orchestrator(0.75).await;
        let now = Utc::now();
        enqueue(&store, event("boundary", now)).await;

        orchestrator.run_sweep(now).await;
        let questions = stored(&orchestrator).await;
        assert_eq!(questions.len(), 4);

        let gated = questions
            .iter()
            .find(|q| q.question_text.contains("Confidence:"))
            .unwrap();
        assert!(gated.question_text.contains("Confidence: 75%"), "{}", gated.question_text);
        assert!(gated.ml_enhanced);
        assert!(gated
            .metadata
            .ml_predictions
            .as_ref()
            .unwrap()
            .contains_key("boundary_probability"));
        // runs_per_over was not returned by the service.
        assert_eq!(questions.iter().filter(|q| q.ml_enhanced).count(), 1);
    }

    #[tokio::test]
    async fn low_confidence_excludes_gated_template_only() {
        let (mut orchestrator, store) = online_orchestrator(0.5).await;
        let now = Utc::now();
        enqueue(&store, event("boundary", now)).await;

        let stats = orchestrator.run_sweep(now).await;
        assert_eq!(stats.questions_generated, 3);
        let questions = stored(&orchestrator).await;
        assert!(questions.iter().all(|q| !q.question_text.contains("Confidence:")));
    }

    #[tokio::test]
    async fn stale_event_is_skipped_and_not_marked() {
        let (mut orchestrator, store) = offline_orchestrator().await;
        let now = Utc::now();
        enqueue(&store, event("boundary", now - chrono::Duration::hours(2))).await;

        let stats = orchestrator.run_sweep(now).await;
        assert_eq!(stats.stale_skipped, 1);
        assert_eq!(stats.questions_generated, 0);
        assert_eq!(orchestrator.dedup.len(), 0);
        assert!(stored(&orchestrator).await.is_empty());
    }

    #[tokio::test]
    async fn repeated_sweeps_generate_once_until_cleared() {
        let (mut orchestrator, store) = offline_orchestrator().await;
        let now = Utc::now();
        enqueue(&store, event("wicket", now)).await;

        assert_eq!(orchestrator.run_sweep(now).await.questions_generated, 4);
        let second = orchestrator.run_sweep(now).await;
        assert_eq!(second.duplicate_skipped, 1);
        assert_eq!(second.questions_generated, 0);
        assert_eq!(stored(&orchestrator).await.len(), 4);

        // Still queued and younger than an hour: generated again after a clear.
        orchestrator.dedup.clear();
        assert_eq!(orchestrator.run_sweep(now).await.questions_generated, 4);
        assert_eq!(stored(&orchestrator).await.len(), 8);
    }

    #[tokio::test]
    async fn unknown_event_type_is_retried_every_sweep() {
        let (mut orchestrator, store) = offline_orchestrator().await;
        let now = Utc::now();
        enqueue(&store, event("dot_ball", now)).await;

        for _ in 0..2 {
            let stats = orchestrator.run_sweep(now).await;
            assert_eq!(stats.without_templates, 1);
            assert_eq!(stats.duplicate_skipped, 0);
        }
        assert_eq!(orchestrator.dedup.len(), 0);
    }

    #[tokio::test]
    async fn malformed_record_does_not_block_the_queue() {
        let (mut orchestrator, store) = offline_orchestrator().await;
        let now = Utc::now();
        enqueue(&store, event("six", now)).await;
        store.push_front(QUEUE, &["{broken".to_string()]).await.unwrap();

        let stats = orchestrator.run_sweep(now).await;
        assert_eq!(stats.events_read, 1);
        assert_eq!(stats.questions_generated, 4);
    }

    #[tokio::test]
    async fn disabled_predictions_write_to_generated_key_space() {
        let mut cfg = Config::for_tests();
        cfg.ml_enabled = false;
        let (mut orchestrator, store) = orchestrator(cfg).await;
        let now = Utc::now();
        enqueue(&store, event("new_over", now)).await;

        orchestrator.run_sweep(now).await;
        assert_eq!(
            store.keys_with_prefix("questions:").await.unwrap(),
            ["questions:generated:m1"]
        );
        let questions = stored(&orchestrator).await;
        assert_eq!(questions.len(), 4);
        assert!(questions
            .iter()
            .any(|q| q.question_text == "Will over 12 go for more than 8 runs?"));
    }

    #[tokio::test]
    async fn start_and_stop_walk_the_state_machine() {
        let mut cfg = Config::for_tests();
        cfg.ml_enabled = false;
        let (orchestrator, store) = orchestrator(cfg).await;
        enqueue(&store, event("milestone", Utc::now())).await;
        let questions = orchestrator.question_store();
        let state_rx = orchestrator.subscribe_state();
        assert_eq!(*state_rx.borrow(), PipelineState::Stopped);

        let handle = orchestrator.start().await;
        assert_eq!(handle.state(), PipelineState::Running);

        let mut generated = 0;
        for _ in 0..100 {
            generated = questions.stats("m1").await.unwrap().count;
            if generated > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(generated, 4);

        // Stop must not wait out the inter-sweep pause.
        tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .unwrap();
        assert_eq!(*state_rx.borrow(), PipelineState::Stopped);
    }

    /// Memory store whose standalone `expire` always fails.
    struct ExpireFails(MemoryListStore);

    #[async_trait]
    impl ListStore for ExpireFails {
        async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            self.0.keys_with_prefix(prefix).await
        }
        async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
            self.0.range(key, start, stop).await
        }
        async fn push_front(&self, key: &str, values: &[String]) -> Result<()> {
            self.0.push_front(key, values).await
        }
        async fn push_front_with_ttl(
            &self,
            key: &str,
            values: &[String],
            ttl: Duration,
        ) -> Result<()> {
            self.0.push_front_with_ttl(key, values, ttl).await
        }
        async fn len(&self, key: &str) -> Result<usize> {
            self.0.len(key).await
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<()> {
            Err(AppError::Io(std::io::Error::other("expire unavailable")))
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            self.0.ttl(key).await
        }
    }

    #[tokio::test]
    async fn stored_questions_carry_ttl_and_are_not_regenerated() {
        let mut cfg = Config::for_tests();
        cfg.ml_enabled = false;
        let store = Arc::new(ExpireFails(MemoryListStore::new()));
        let mut orchestrator = Orchestrator::new(
            &cfg,
            store.clone(),
            TemplateCatalog::baseline().unwrap(),
            Arc::new(LatencyStats::new()),
        )
        .unwrap();
        let now = Utc::now();
        store
            .push_front(QUEUE, &[event("boundary", now).to_string()])
            .await
            .unwrap();

        for _ in 0..3 {
            assert_eq!(orchestrator.run_sweep(now).await.event_failures, 0);
        }

        assert_eq!(store.len("questions:generated:m1").await.unwrap(), 4);
        let ttl = store.ttl("questions:generated:m1").await.unwrap().unwrap();
        assert!(ttl.as_secs() > QUESTION_TTL_SECS - 60);
    }

    #[tokio::test]
    async fn questions_are_attributed_to_the_queue_match() {
        let (mut orchestrator, store) = offline_orchestrator().await;
        let now = Utc::now();
        let mut record = event("six", now);
        record["matchId"] = json!("m-elsewhere");
        enqueue(&store, record).await;

        orchestrator.run_sweep(now).await;
        let questions = stored(&orchestrator).await;
        assert_eq!(questions.len(), 4);
        assert!(questions.iter().all(|q| q.match_id == "m1"));
        assert!(store
            .keys_with_prefix("questions:")
            .await
            .unwrap()
            .iter()
            .all(|k| k == "questions:enhanced:m1"));
    }
}
