use crate::error::{AppError, Result};

pub const REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const PREDICTION_SERVICE_URL: &str = "http://localhost:5001";

/// Upstream producers LPUSH raw events under `event:queue:<matchId>`.
pub const EVENT_QUEUE_PREFIX: &str = "event:queue:";

/// Question list prefixes. The non-ML variant writes under its own key space so
/// consumers can tell the two apart.
pub const QUESTIONS_ENHANCED_PREFIX: &str = "questions:enhanced:";
pub const QUESTIONS_GENERATED_PREFIX: &str = "questions:generated:";

/// Pause between two full sweeps over all queues (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 5;

/// The processed-event set is wiped wholesale on this interval (seconds).
pub const DEDUP_CLEAR_INTERVAL_SECS: u64 = 300;

/// Events older than this (by their own timestamp) are never processed (seconds).
pub const MAX_EVENT_AGE_SECS: i64 = 3600;

/// Prediction service `/health` probe interval (seconds).
pub const HEALTH_PROBE_INTERVAL_SECS: u64 = 30;

/// Cached prediction responses older than this are treated as absent (seconds).
pub const PREDICTION_CACHE_TTL_SECS: u64 = 30;

/// Question lists expire this long after the most recent write (seconds).
pub const QUESTION_TTL_SECS: u64 = 7200;

/// Default number of questions returned by the read API.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    /// `redis` (default) or `memory` for local runs without a Redis server (STORE_BACKEND)
    pub store_backend: StoreBackend,
    pub prediction_url: String,
    /// Per-call timeout for prediction requests (PREDICTION_TIMEOUT_MS)
    pub prediction_timeout_ms: u64,
    /// Extra attempts after a failed prediction call. 0 = single attempt (PREDICTION_MAX_RETRIES)
    pub prediction_max_retries: u32,
    /// Model selector forwarded to the service, usually "best" (PREDICTION_MODEL_TYPE)
    pub prediction_model_type: String,
    /// When false no features are extracted and no predictions are requested
    /// (ML_PREDICTIONS_ENABLED)
    pub ml_enabled: bool,
    /// Events read per queue per sweep (QUEUE_PAGE_SIZE)
    pub queue_page_size: usize,
    pub log_level: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| REDIS_URL.to_string()),
            store_backend: match std::env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "redis".to_string())
                .to_lowercase()
                .as_str()
            {
                "redis" => StoreBackend::Redis,
                "memory" => StoreBackend::Memory,
                other => {
                    return Err(AppError::Config(format!(
                        "STORE_BACKEND must be 'redis' or 'memory', got '{other}'"
                    )))
                }
            },
            prediction_url: std::env::var("PREDICTION_SERVICE_URL")
                .unwrap_or_else(|_| PREDICTION_SERVICE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            prediction_timeout_ms: std::env::var("PREDICTION_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse::<u64>()
                .unwrap_or(5000),
            prediction_max_retries: std::env::var("PREDICTION_MAX_RETRIES")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u32>()
                .unwrap_or(0),
            prediction_model_type: std::env::var("PREDICTION_MODEL_TYPE")
                .unwrap_or_else(|_| "best".to_string()),
            ml_enabled: std::env::var("ML_PREDICTIONS_ENABLED")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            queue_page_size: std::env::var("QUEUE_PAGE_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(10),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3002".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
        })
    }

    /// Key prefix for persisted questions, depending on whether ML is in play.
    pub fn questions_prefix(&self) -> &'static str {
        if self.ml_enabled {
            QUESTIONS_ENHANCED_PREFIX
        } else {
            QUESTIONS_GENERATED_PREFIX
        }
    }
}

#[cfg(test)]
impl Config {
    /// Defaults without touching the process environment.
    pub fn for_tests() -> Self {
        Self {
            redis_url: REDIS_URL.to_string(),
            store_backend: StoreBackend::Memory,
            prediction_url: PREDICTION_SERVICE_URL.to_string(),
            prediction_timeout_ms: 5000,
            prediction_max_retries: 0,
            prediction_model_type: "best".to_string(),
            ml_enabled: true,
            queue_page_size: 10,
            log_level: "info".to_string(),
            api_port: 3002,
        }
    }
}
