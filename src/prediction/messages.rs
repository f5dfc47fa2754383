//! JSON bodies exchanged with the prediction service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::features::FeatureRecord;
use crate::types::{PredictionOutput, PredictionSet};

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub models_loaded: usize,
    #[serde(default)]
    pub available_targets: Vec<String>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

#[derive(Debug, Serialize)]
pub struct PredictRequest<'a> {
    pub features: &'a FeatureRecord,
    pub model_type: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub prediction: PredictionOutput,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchPredictRequest<'a> {
    pub features: &'a FeatureRecord,
    pub targets: Vec<&'static str>,
    pub model_types: HashMap<&'static str, &'a str>,
}

#[derive(Debug, Deserialize)]
pub struct BatchPredictResponse {
    #[serde(default)]
    pub predictions: PredictionSet,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn default_model_type() -> String {
    "best".to_string()
}
