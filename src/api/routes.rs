use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::config::DEFAULT_RECENT_LIMIT;
use crate::error::AppError;
use crate::pipeline::PipelineState;
use crate::questions::{QuestionStats, QuestionStore};
use crate::types::GeneratedQuestion;

/// Upper bound on `?limit=` so one request cannot pull a whole list.
const MAX_RECENT_LIMIT: usize = 500;

#[derive(Clone)]
pub struct ApiState {
    pub questions: Arc<QuestionStore>,
    pub latency: Arc<LatencyStats>,
    pub prediction_healthy: Arc<AtomicBool>,
    pub pipeline: watch::Receiver<PipelineState>,
    pub ml_enabled: bool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/matches/:id/questions", get(get_match_questions))
        .route("/matches/:id/stats", get(get_match_stats))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentQuestionsQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub pipeline: String,
    pub ml_enabled: bool,
    pub prediction_service_healthy: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchStatsResponse {
    pub match_id: String,
    pub count: usize,
    pub ttl_remaining_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let pipeline = *state.pipeline.borrow();
    Json(HealthResponse {
        pipeline: pipeline.to_string(),
        ml_enabled: state.ml_enabled,
        prediction_service_healthy: state.prediction_healthy.load(Ordering::Relaxed),
    })
}

async fn get_match_questions(
    State(state): State<ApiState>,
    Path(match_id): Path<String>,
    Query(params): Query<RecentQuestionsQuery>,
) -> Result<Json<Vec<GeneratedQuestion>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT);
    let questions = state.questions.read_recent(&match_id, limit).await?;
    Ok(Json(questions))
}

async fn get_match_stats(
    State(state): State<ApiState>,
    Path(match_id): Path<String>,
) -> Result<Json<MatchStatsResponse>, AppError> {
    let QuestionStats {
        count,
        ttl_remaining_secs,
    } = state.questions.stats(&match_id).await?;
    Ok(Json(MatchStatsResponse {
        match_id,
        count,
        ttl_remaining_secs,
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}
