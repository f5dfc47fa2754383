use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Raw events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Boundary,
    Six,
    Wicket,
    NewOver,
    Milestone,
    /// Anything upstream emits that has no templates (e.g. `dot_ball`).
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Boundary => "boundary",
            EventType::Six => "six",
            EventType::Wicket => "wicket",
            EventType::NewOver => "new_over",
            EventType::Milestone => "milestone",
            EventType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record from a match's event queue. Everything not named here is kept
/// verbatim in `context` and read by the feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub match_id: String,
    #[serde(with = "event_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batsman: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bowler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wickets: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_scalar_string"
    )]
    pub milestone: Option<String>,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl RawEvent {
    /// Dedup key: type + matchId + timestamp + batsman + bowler.
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.event_type,
            self.match_id,
            self.timestamp.timestamp_millis(),
            self.batsman.as_deref().unwrap_or(""),
            self.bowler.as_deref().unwrap_or(""),
        )
    }

    /// Over number rendered without a trailing `.0` for whole overs.
    pub fn over_label(&self) -> Option<String> {
        self.over.map(|o| {
            if o.fract() == 0.0 {
                format!("{}", o as i64)
            } else {
                format!("{o}")
            }
        })
    }
}

/// Upstream producers are inconsistent: some write RFC 3339 strings, others
/// epoch milliseconds. Both decode to UTC; we always write RFC 3339 back.
mod event_timestamp {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Value::deserialize(d)? {
            Value::Number(n) => {
                let ms = n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .ok_or_else(|| de::Error::custom("timestamp out of range"))?;
                from_millis(ms).ok_or_else(|| de::Error::custom("timestamp out of range"))
            }
            Value::String(s) => {
                if let Ok(ms) = s.trim().parse::<i64>() {
                    return from_millis(ms)
                        .ok_or_else(|| de::Error::custom("timestamp out of range"));
                }
                DateTime::parse_from_rfc3339(s.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| de::Error::custom(format!("invalid timestamp '{s}': {e}")))
            }
            other => Err(de::Error::custom(format!("invalid timestamp: {other}"))),
        }
    }

    fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(ms).single()
    }
}

fn de_opt_scalar_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionTarget {
    WicketOccurrence,
    RunsPerOver,
    BoundaryProbability,
    RunRateChange,
}

impl PredictionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionTarget::WicketOccurrence => "wicket_occurrence",
            PredictionTarget::RunsPerOver => "runs_per_over",
            PredictionTarget::BoundaryProbability => "boundary_probability",
            PredictionTarget::RunRateChange => "run_rate_change",
        }
    }
}

impl std::fmt::Display for PredictionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Model output for one target. Classifiers populate `probabilities` and
/// `confidence`; regressors leave both empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    #[serde(deserialize_with = "de_numeric")]
    pub prediction: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probabilities: Vec<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPrediction {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub prediction: PredictionOutput,
}

impl TargetPrediction {
    pub fn confidence(&self) -> Option<f64> {
        self.prediction.confidence
    }

    pub fn value(&self) -> f64 {
        self.prediction.prediction
    }
}

fn default_model_type() -> String {
    "best".to_string()
}

/// Predictions for one event, keyed by target name as the service returns them.
pub type PredictionSet = HashMap<String, TargetPrediction>;

/// Class labels come back as numbers, booleans or numeric strings depending on
/// the model; all of them collapse to a float.
fn de_numeric<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| D::Error::custom("non-finite prediction")),
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("non-numeric prediction '{s}'"))),
        other => Err(D::Error::custom(format!("unsupported prediction value: {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Prediction,
    PlayerPerformance,
    BowlingPerformance,
    MatchProgress,
    Milestone,
}

impl std::fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuestionCategory::Prediction => "prediction",
            QuestionCategory::PlayerPerformance => "player_performance",
            QuestionCategory::BowlingPerformance => "bowling_performance",
            QuestionCategory::MatchProgress => "match_progress",
            QuestionCategory::Milestone => "milestone",
        };
        write!(f, "{s}")
    }
}

/// A persisted question. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
    pub question_id: String,
    pub question_text: String,
    pub event_type: EventType,
    pub match_id: String,
    pub difficulty: Difficulty,
    pub category: QuestionCategory,
    pub context: String,
    pub timestamp: DateTime<Utc>,
    pub ml_enhanced: bool,
    pub metadata: QuestionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetadata {
    pub original_event: RawEvent,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_predictions: Option<PredictionSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_weight: Option<f64>,
}
