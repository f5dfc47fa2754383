use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::templates::placeholder::{EventField, Placeholder, PredictionField, Segment};
use crate::templates::selector::Selection;
use crate::types::{GeneratedQuestion, PredictionSet, QuestionMetadata, RawEvent, TargetPrediction};

/// Bucket boundaries for `riskLevel` / `analysis`.
const HIGH_THRESHOLD: f64 = 0.7;
const MEDIUM_THRESHOLD: f64 = 0.4;

/// Text for one template slot while passes are running.
enum Slot<'t> {
    Text(String),
    Literal(&'t str),
    Pending(PredictionField),
}

/// Turns a selected template into a finished question in three passes:
/// event fields, then prediction fields, then fixed fallbacks. The last pass
/// maps every remaining slot, so no placeholder can survive.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderResolver;

impl PlaceholderResolver {
    pub fn new() -> Self {
        Self
    }

    /// `match_id` is the match the question is stored under. It wins over the
    /// event body's `matchId`.
    pub fn resolve(
        &self,
        match_id: &str,
        event: &RawEvent,
        selection: &Selection<'_>,
        generated_at: DateTime<Utc>,
    ) -> GeneratedQuestion {
        let template = selection.template;
        let question_text = self.render(template.segments(), event, selection.prediction);

        let ml_predictions = match (template.ml_target, selection.prediction) {
            (Some(target), Some(prediction)) => {
                let mut set = PredictionSet::new();
                set.insert(target.as_str().to_string(), prediction.clone());
                Some(set)
            }
            _ => None,
        };

        GeneratedQuestion {
            question_id: question_id(match_id, event, &template.text, generated_at),
            question_text,
            event_type: event.event_type,
            match_id: match_id.to_string(),
            difficulty: template.difficulty,
            category: template.category,
            context: template.context.clone(),
            timestamp: generated_at,
            ml_enhanced: selection.prediction.is_some(),
            metadata: QuestionMetadata {
                original_event: event.clone(),
                template: template.text.clone(),
                ml_predictions,
                prediction_weight: template.prediction_weight,
            },
        }
    }

    pub fn render(
        &self,
        segments: &[Segment],
        event: &RawEvent,
        prediction: Option<&TargetPrediction>,
    ) -> String {
        // Pass 1: event placeholders.
        let slots: Vec<Slot<'_>> = segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => Slot::Literal(text),
                Segment::Placeholder(Placeholder::Event(field)) => {
                    Slot::Text(event_value(*field, event))
                }
                Segment::Placeholder(Placeholder::Prediction(field)) => Slot::Pending(*field),
            })
            .collect();

        // Pass 2: prediction placeholders, only with a prediction in hand.
        let slots: Vec<Slot<'_>> = match prediction {
            Some(p) => slots
                .into_iter()
                .map(|slot| match slot {
                    Slot::Pending(field) => match prediction_value(field, p) {
                        Some(text) => Slot::Text(text),
                        None => Slot::Pending(field),
                    },
                    other => other,
                })
                .collect(),
            None => slots,
        };

        // Pass 3: fallbacks for anything still pending.
        let mut out = String::new();
        for slot in &slots {
            match slot {
                Slot::Text(text) => out.push_str(text),
                Slot::Literal(text) => out.push_str(text),
                Slot::Pending(field) => out.push_str(fallback_value(*field)),
            }
        }
        out
    }
}

fn event_value(field: EventField, event: &RawEvent) -> String {
    let value = match field {
        EventField::Batsman => event.batsman.clone(),
        EventField::Bowler => event.bowler.clone(),
        EventField::Runs => event.runs.map(|r| r.to_string()),
        EventField::Wickets => event.wickets.map(|w| w.to_string()),
        EventField::Over => event.over_label(),
        EventField::Milestone => event.milestone.clone(),
    };
    match value.map(|v| sanitize(&v)).filter(|v| !v.is_empty()) {
        Some(v) => v,
        None => event_fallback(field).to_string(),
    }
}

/// Event text is upstream-controlled; braces would let it smuggle tokens into
/// the rendered question.
fn sanitize(value: &str) -> String {
    value.replace(['{', '}'], "").trim().to_string()
}

fn event_fallback(field: EventField) -> &'static str {
    match field {
        EventField::Batsman => "the batsman",
        EventField::Bowler => "the bowler",
        EventField::Runs | EventField::Wickets | EventField::Over => "X",
        EventField::Milestone => "a milestone",
    }
}

/// `None` when the prediction lacks what the field needs (e.g. a regressor
/// has no confidence); the fallback pass then fills it.
fn prediction_value(field: PredictionField, p: &TargetPrediction) -> Option<String> {
    let value = p.value();
    // Buckets follow confidence when the model reports one.
    let score = p.confidence().unwrap_or(value);
    match field {
        PredictionField::Confidence => p.confidence().map(|c| percent(c).to_string()),
        PredictionField::Probability => Some(percent(value).to_string()),
        PredictionField::MlScore => p.confidence().map(|c| format!("{:.1}", c * 10.0)),
        PredictionField::PredictedRuns
        | PredictionField::PredictedBoundaries
        | PredictionField::PredictedSixes
        | PredictionField::PredictedWickets => Some(format!("{}", value.round().max(0.0) as i64)),
        PredictionField::RiskLevel => Some(bucket(score, ["High", "Medium", "Low"]).to_string()),
        PredictionField::Analysis => {
            Some(bucket(score, ["very likely", "possible", "unlikely"]).to_string())
        }
    }
}

fn fallback_value(field: PredictionField) -> &'static str {
    match field {
        PredictionField::Confidence => "60",
        PredictionField::Probability => "50",
        PredictionField::MlScore => "6.0",
        PredictionField::PredictedRuns => "8",
        PredictionField::PredictedBoundaries => "1",
        PredictionField::PredictedSixes => "1",
        PredictionField::PredictedWickets => "1",
        PredictionField::RiskLevel => "Medium",
        PredictionField::Analysis => "possible",
    }
}

fn percent(fraction: f64) -> i64 {
    (fraction * 100.0).round() as i64
}

fn bucket(score: f64, labels: [&'static str; 3]) -> &'static str {
    if score > HIGH_THRESHOLD {
        labels[0]
    } else if score > MEDIUM_THRESHOLD {
        labels[1]
    } else {
        labels[2]
    }
}

/// Deterministic id from match, event type, template and generation time.
fn question_id(
    match_id: &str,
    event: &RawEvent,
    template: &str,
    generated_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(match_id.as_bytes());
    hasher.update(b"|");
    hasher.update(event.event_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(template.as_bytes());
    hasher.update(b"|");
    hasher.update(generated_at.timestamp_millis().to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("q_{}", &digest[..16])
}
