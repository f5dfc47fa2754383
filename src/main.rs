mod api;
mod config;
mod error;
mod features;
mod pipeline;
mod prediction;
mod questions;
mod queue;
mod store;
mod templates;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, StoreBackend};
use crate::error::Result;
use crate::pipeline::Orchestrator;
use crate::store::{ListStore, MemoryListStore, RedisListStore};
use crate::templates::TemplateCatalog;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Store ---
    let store: Arc<dyn ListStore> = match cfg.store_backend {
        StoreBackend::Redis => {
            Arc::new(RedisListStore::connect(&cfg.redis_url).await?)
        }
        StoreBackend::Memory => {
            warn!("STORE_BACKEND=memory: queues and questions live in this process only");
            Arc::new(MemoryListStore::new())
        }
    };

    // --- Templates ---
    let catalog = TemplateCatalog::baseline()?;
    info!("Template catalog ready: {} templates", catalog.len());

    if cfg.ml_enabled {
        info!(
            "Prediction service at {} (model_type={}, timeout={}ms, retries={})",
            cfg.prediction_url,
            cfg.prediction_model_type,
            cfg.prediction_timeout_ms,
            cfg.prediction_max_retries,
        );
    } else {
        warn!("ML_PREDICTIONS_ENABLED=false: all questions use static fallbacks");
    }

    // --- Pipeline ---
    let latency = Arc::new(LatencyStats::new());
    let orchestrator = Orchestrator::new(&cfg, Arc::clone(&store), catalog, Arc::clone(&latency))?;
    let api_state = ApiState {
        questions: orchestrator.question_store(),
        latency,
        prediction_healthy: orchestrator.prediction_health(),
        pipeline: orchestrator.subscribe_state(),
        ml_enabled: cfg.ml_enabled,
    };
    let handle = orchestrator.start().await;

    // --- HTTP API ---
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
