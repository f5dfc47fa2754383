use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::latency::LatencyStats;
use crate::config::{Config, PREDICTION_CACHE_TTL_SECS};
use crate::error::{AppError, Result};
use crate::features::FeatureRecord;
use crate::prediction::cache::{CacheKey, PredictionCache};
use crate::prediction::messages::{
    BatchPredictRequest, BatchPredictResponse, HealthResponse, PredictRequest, PredictResponse,
};
use crate::types::{PredictionSet, PredictionTarget, RawEvent, TargetPrediction};

/// HTTP client for the external prediction service.
///
/// Every public call degrades to `None` instead of erroring: a missing
/// prediction only lowers question quality, it never blocks generation.
pub struct PredictionClient {
    http: reqwest::Client,
    base_url: String,
    model_type: String,
    max_retries: u32,
    healthy: Arc<AtomicBool>,
    cache: PredictionCache,
    latency: Arc<LatencyStats>,
}

impl PredictionClient {
    pub fn new(cfg: &Config, latency: Arc<LatencyStats>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.prediction_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.prediction_url.clone(),
            model_type: cfg.prediction_model_type.clone(),
            max_retries: cfg.prediction_max_retries,
            // Unhealthy until the first probe says otherwise.
            healthy: Arc::new(AtomicBool::new(false)),
            cache: PredictionCache::new(Duration::from_secs(PREDICTION_CACHE_TTL_SECS)),
            latency,
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Shared flag for readers outside the pipeline (the read API).
    pub fn health_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    /// One probe of `GET /health`; updates and returns the flag.
    pub async fn check_health(&self) -> bool {
        probe(&self.http, &self.base_url, &self.healthy).await
    }

    /// Independent probe loop. Only ever writes the health flag.
    pub fn spawn_health_probe(&self, every: Duration) -> JoinHandle<()> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let healthy = Arc::clone(&self.healthy);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // consume immediate first tick, startup already probed

            loop {
                ticker.tick().await;
                probe(&http, &base_url, &healthy).await;
            }
        })
    }

    /// Single-target prediction. `None` when unhealthy or on any failure.
    pub async fn predict(
        &self,
        target: PredictionTarget,
        features: &FeatureRecord,
    ) -> Option<TargetPrediction> {
        if !self.is_healthy() {
            return None;
        }
        let url = format!("{}/predict/{}", self.base_url, target);
        let body = PredictRequest {
            features,
            model_type: &self.model_type,
        };
        let resp: PredictResponse = self.post_with_retries(&url, &body).await?;
        debug!(
            target = %target,
            model_type = %resp.model_type,
            served_target = resp.target.as_deref().unwrap_or("-"),
            served_at = resp.timestamp.as_deref().unwrap_or("-"),
            "Prediction received"
        );
        Some(TargetPrediction {
            model_type: resp.model_type,
            prediction: resp.prediction,
        })
    }

    /// Several targets in one request. `None` when unhealthy or on any failure.
    pub async fn predict_batch(
        &self,
        features: &FeatureRecord,
        targets: &[PredictionTarget],
    ) -> Option<PredictionSet> {
        if !self.is_healthy() || targets.is_empty() {
            return None;
        }
        let url = format!("{}/predict_batch", self.base_url);
        let body = BatchPredictRequest {
            features,
            targets: targets.iter().map(|t| t.as_str()).collect(),
            model_types: targets
                .iter()
                .map(|t| (t.as_str(), self.model_type.as_str()))
                .collect(),
        };
        let resp: BatchPredictResponse = self.post_with_retries(&url, &body).await?;
        debug!(
            requested = targets.len(),
            returned = resp.predictions.len(),
            served_at = resp.timestamp.as_deref().unwrap_or("-"),
            "Batch prediction received"
        );
        Some(resp.predictions)
    }

    /// Cache-aware batch prediction for one event. A fresh cache entry is
    /// served even while the service is down.
    pub async fn predictions_for_event(
        &mut self,
        event: &RawEvent,
        features: &FeatureRecord,
        targets: &[PredictionTarget],
    ) -> Option<PredictionSet> {
        let key = CacheKey::for_event(event);
        if let Some(cached) = self.cache.get(&key) {
            debug!(
                match_id = %event.match_id,
                event_type = %event.event_type,
                "Prediction cache hit"
            );
            return Some(cached.clone());
        }
        if !self.is_healthy() {
            debug!(match_id = %event.match_id, "Prediction service unhealthy, skipping call");
            return None;
        }
        let predictions = self.predict_batch(features, targets).await?;
        self.cache.insert(key, predictions.clone());
        Some(predictions)
    }

    async fn post_with_retries<B, T>(&self, url: &str, body: &B) -> Option<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            let started = Instant::now();
            let result = self.post_json(url, body).await;
            self.latency.record(started.elapsed());
            match result {
                Ok(value) => return Some(value),
                Err(e) => {
                    warn!(url, attempt, attempts, "Prediction request failed: {e}");
                }
            }
        }
        None
    }

    /// One call plus the configured retries.
    fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::PredictionService(format!("{status}: {text}")));
        }
        Ok(resp.json::<T>().await?)
    }
}

async fn probe(http: &reqwest::Client, base_url: &str, healthy: &AtomicBool) -> bool {
    let url = format!("{base_url}/health");
    let outcome: Result<HealthResponse> = async {
        let resp = http.get(&url).send().await?.error_for_status()?;
        Ok(resp.json::<HealthResponse>().await?)
    }
    .await;

    let now_healthy = match outcome {
        Ok(h) if h.is_healthy() => {
            debug!(
                models_loaded = h.models_loaded,
                targets = ?h.available_targets,
                "Prediction service healthy"
            );
            true
        }
        Ok(h) => {
            warn!(status = %h.status, "Prediction service reports unhealthy");
            false
        }
        Err(e) => {
            warn!("Prediction service health probe failed: {e}");
            false
        }
    };

    let was_healthy = healthy.swap(now_healthy, Ordering::Relaxed);
    if was_healthy != now_healthy {
        info!(healthy = now_healthy, "Prediction service health changed");
    }
    now_healthy
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::{FeatureExtractor, MatchContext};
    use axum::http::StatusCode;
    use axum::{extract::Path, routing::get, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Fake prediction service on an ephemeral port. Returns its base URL and
    /// a counter of prediction requests served.
    pub(crate) async fn spawn_fake_service(
        health_status: &'static str,
        boundary_confidence: f64,
    ) -> (String, Arc<AtomicUsize>) {
        let status = Arc::new(Mutex::new(health_status));
        spawn_switchable_service(status, boundary_confidence).await
    }

    /// Like `spawn_fake_service`, but `/health` reports whatever `status`
    /// holds at request time.
    pub(crate) async fn spawn_switchable_service(
        status: Arc<Mutex<&'static str>>,
        boundary_confidence: f64,
    ) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let batch_calls = Arc::clone(&calls);
        let single_calls = Arc::clone(&calls);

        let app = Router::new()
            .route(
                "/health",
                get(move || {
                    let health_status = *status.lock().unwrap();
                    async move {
                        Json(json!({
                            "status": health_status,
                            "models_loaded": 2,
                            "available_targets": ["boundary_probability", "runs_per_over"]
                        }))
                    }
                }),
            )
            .route(
                "/predict_batch",
                post(move |Json(body): Json<Value>| {
                    let calls = Arc::clone(&batch_calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let mut predictions = serde_json::Map::new();
                        for target in body["targets"].as_array().into_iter().flatten() {
                            if target == "boundary_probability" {
                                predictions.insert(
                                    "boundary_probability".into(),
                                    json!({
                                        "model_type": "best",
                                        "prediction": {
                                            "prediction": 1,
                                            "probabilities": [1.0 - boundary_confidence, boundary_confidence],
                                            "confidence": boundary_confidence
                                        }
                                    }),
                                );
                            }
                        }
                        Json(json!({
                            "predictions": predictions,
                            "timestamp": "2024-01-01T00:00:00"
                        }))
                    }
                }),
            )
            .route(
                "/predict/:target",
                post(move |Path(target): Path<String>| {
                    let calls = Arc::clone(&single_calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Json(json!({
                            "target": target,
                            "model_type": "best",
                            "prediction": {"prediction": 7.6, "confidence": null},
                            "timestamp": "2024-01-01T00:00:00"
                        }))
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), calls)
    }

    /// A URL nothing listens on.
    pub(crate) async fn unreachable_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }

    fn client_for(url: &str) -> PredictionClient {
        let mut cfg = Config::for_tests();
        cfg.prediction_url = url.to_string();
        cfg.prediction_timeout_ms = 1000;
        PredictionClient::new(&cfg, Arc::new(LatencyStats::new())).unwrap()
    }

    fn sample_event() -> RawEvent {
        serde_json::from_value(json!({
            "type": "boundary",
            "matchId": "m1",
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "batsman": "Virat Kohli"
        }))
        .unwrap()
    }

    fn features(event: &RawEvent) -> FeatureRecord {
        FeatureExtractor::new().extract(event, &MatchContext::from_event(event))
    }

    #[tokio::test]
    async fn healthy_service_serves_batch_predictions() {
        let (url, _) = spawn_fake_service("healthy", 0.75).await;
        let client = client_for(&url);
        assert!(!client.is_healthy());
        assert!(client.check_health().await);

        let event = sample_event();
        let set = client
            .predict_batch(&features(&event), &[PredictionTarget::BoundaryProbability])
            .await
            .unwrap();
        assert_eq!(set["boundary_probability"].confidence(), Some(0.75));
    }

    #[tokio::test]
    async fn single_target_prediction_without_confidence() {
        let (url, _) = spawn_fake_service("healthy", 0.75).await;
        let client = client_for(&url);
        client.check_health().await;

        let event = sample_event();
        let p = client
            .predict(PredictionTarget::RunsPerOver, &features(&event))
            .await
            .unwrap();
        assert!((p.value() - 7.6).abs() < 1e-9);
        assert_eq!(p.confidence(), None);
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_none() {
        let url = unreachable_url().await;
        let mut client = client_for(&url);
        assert!(!client.check_health().await);

        let event = sample_event();
        let f = features(&event);
        assert!(client.predict(PredictionTarget::WicketOccurrence, &f).await.is_none());
        assert!(client
            .predictions_for_event(&event, &f, &[PredictionTarget::BoundaryProbability])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn unhealthy_status_blocks_calls() {
        let (url, calls) = spawn_fake_service("degraded", 0.75).await;
        let client = client_for(&url);
        assert!(!client.check_health().await);

        let event = sample_event();
        assert!(client
            .predict_batch(&features(&event), &[PredictionTarget::BoundaryProbability])
            .await
            .is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_event_hits_the_cache() {
        let (url, calls) = spawn_fake_service("healthy", 0.8).await;
        let mut client = client_for(&url);
        client.check_health().await;

        let event = sample_event();
        let f = features(&event);
        let targets = [PredictionTarget::BoundaryProbability];
        let first = client.predictions_for_event(&event, &f, &targets).await.unwrap();
        let second = client.predictions_for_event(&event, &f, &targets).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn latency_is_recorded_per_call() {
        let (url, _) = spawn_fake_service("healthy", 0.8).await;
        let latency = Arc::new(LatencyStats::new());
        let mut cfg = Config::for_tests();
        cfg.prediction_url = url;
        let client = PredictionClient::new(&cfg, Arc::clone(&latency)).unwrap();
        client.check_health().await;

        let event = sample_event();
        client
            .predict_batch(&features(&event), &[PredictionTarget::BoundaryProbability])
            .await
            .unwrap();
        assert_eq!(latency.snapshot().samples, 1);
    }

    async fn wait_for_health(client: &PredictionClient, expected: bool) -> bool {
        for _ in 0..200 {
            if client.is_healthy() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn health_loop_follows_service_status() {
        let status = Arc::new(Mutex::new("healthy"));
        let (url, _) = spawn_switchable_service(Arc::clone(&status), 0.8).await;
        let client = client_for(&url);
        assert!(!client.is_healthy());

        let checker = client.spawn_health_probe(Duration::from_millis(20));
        assert!(wait_for_health(&client, true).await);

        *status.lock().unwrap() = "degraded";
        assert!(wait_for_health(&client, false).await);

        *status.lock().unwrap() = "healthy";
        assert!(wait_for_health(&client, true).await);
        checker.abort();
    }

    #[tokio::test]
    async fn failing_calls_are_retried_exactly_max_retries_times() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new()
            .route(
                "/health",
                get(|| async { Json(json!({"status": "healthy"})) }),
            )
            .route(
                "/predict_batch",
                post(move || {
                    let calls = Arc::clone(&counter);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::INTERNAL_SERVER_ERROR, "model crashed")
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let latency = Arc::new(LatencyStats::new());
        let mut cfg = Config::for_tests();
        cfg.prediction_url = format!("http://{addr}");
        cfg.prediction_max_retries = 2;
        let client = PredictionClient::new(&cfg, Arc::clone(&latency)).unwrap();
        assert!(client.check_health().await);

        let event = sample_event();
        let result = client
            .predict_batch(&features(&event), &[PredictionTarget::BoundaryProbability])
            .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(latency.snapshot().samples, 3);
    }

    #[test]
    fn huge_retry_count_does_not_overflow() {
        let mut cfg = Config::for_tests();
        cfg.prediction_max_retries = u32::MAX;
        let client = PredictionClient::new(&cfg, Arc::new(LatencyStats::new())).unwrap();
        assert_eq!(client.attempts(), u32::MAX);
        assert_eq!(client_for("http://127.0.0.1:1").attempts(), 1);
    }
}
