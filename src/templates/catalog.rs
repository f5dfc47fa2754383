use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::templates::placeholder::{parse_template, Segment};
use crate::types::{Difficulty, EventType, PredictionTarget, QuestionCategory};

use Difficulty::{Easy, Hard, Medium};
use PredictionTarget::{BoundaryProbability, RunsPerOver, WicketOccurrence};
use QuestionCategory::{
    BowlingPerformance, MatchProgress, Milestone, PlayerPerformance, Prediction,
};

/// A compiled question template. Immutable once the catalog is built.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionTemplate {
    pub text: String,
    pub difficulty: Difficulty,
    pub category: QuestionCategory,
    pub context: String,
    pub ml_target: Option<PredictionTarget>,
    /// Minimum model confidence for the enhanced form. Only meaningful with `ml_target`.
    pub confidence_threshold: Option<f64>,
    pub prediction_weight: Option<f64>,
    segments: Vec<Segment>,
}

impl QuestionTemplate {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Static description of a template before parsing.
#[derive(Debug, Clone, Copy)]
pub struct TemplateDef {
    pub text: &'static str,
    pub difficulty: Difficulty,
    pub category: QuestionCategory,
    pub context: &'static str,
    pub ml_target: Option<PredictionTarget>,
    pub confidence_threshold: Option<f64>,
    pub prediction_weight: Option<f64>,
}

const fn plain(
    text: &'static str,
    difficulty: Difficulty,
    category: QuestionCategory,
    context: &'static str,
) -> TemplateDef {
    TemplateDef {
        text,
        difficulty,
        category,
        context,
        ml_target: None,
        confidence_threshold: None,
        prediction_weight: None,
    }
}

const fn gated(
    text: &'static str,
    difficulty: Difficulty,
    category: QuestionCategory,
    context: &'static str,
    target: PredictionTarget,
    threshold: Option<f64>,
    weight: f64,
) -> TemplateDef {
    TemplateDef {
        text,
        difficulty,
        category,
        context,
        ml_target: Some(target),
        confidence_threshold: threshold,
        prediction_weight: Some(weight),
    }
}

const BOUNDARY: [TemplateDef; 4] = [
    plain(
        "Will {batsman} hit another boundary in this over?",
        Easy,
        Prediction,
        "boundary_streak",
    ),
    gated(
        "Will {batsman} hit another boundary in the next over? Confidence: {confidence}%",
        Medium,
        Prediction,
        "ml_boundary_forecast",
        BoundaryProbability,
        Some(0.6),
        0.8,
    ),
    gated(
        "Will {batsman} and partner take more than {predictedRuns} runs off the next over?",
        Medium,
        MatchProgress,
        "ml_runs_forecast",
        RunsPerOver,
        None,
        0.5,
    ),
    plain(
        "{batsman} just found the rope off {bowler}. Will {bowler} concede another boundary this over?",
        Hard,
        BowlingPerformance,
        "bowler_response",
    ),
];

const SIX: [TemplateDef; 4] = [
    plain(
        "Will {batsman} clear the ropes again in this innings?",
        Easy,
        PlayerPerformance,
        "six_follow_up",
    ),
    gated(
        "Is another six {analysis} from {batsman} in the next over? Model confidence: {confidence}%",
        Medium,
        Prediction,
        "ml_six_forecast",
        BoundaryProbability,
        Some(0.65),
        0.7,
    ),
    gated(
        "{batsman} is on the charge. Will the next over go for more than {predictedRuns} runs?",
        Hard,
        MatchProgress,
        "ml_runs_forecast",
        RunsPerOver,
        None,
        0.5,
    ),
    plain(
        "Will {bowler} bowl a dot ball to {batsman} with the next delivery?",
        Medium,
        BowlingPerformance,
        "bowler_response",
    ),
];

const WICKET: [TemplateDef; 4] = [
    plain(
        "Will the new batter survive the next over after {batsman}'s dismissal?",
        Easy,
        MatchProgress,
        "new_batter",
    ),
    gated(
        "Will another wicket fall in the next over? Risk level: {riskLevel} (confidence {confidence}%)",
        Medium,
        Prediction,
        "ml_wicket_forecast",
        WicketOccurrence,
        Some(0.6),
        0.8,
    ),
    plain(
        "Will {bowler} take another wicket in this spell?",
        Medium,
        BowlingPerformance,
        "bowler_spell",
    ),
    gated(
        "With {wickets} wickets down, is a collapse {analysis}? Will another wicket fall within two overs?",
        Hard,
        Prediction,
        "ml_collapse_forecast",
        WicketOccurrence,
        Some(0.7),
        0.9,
    ),
];

const NEW_OVER: [TemplateDef; 4] = [
    plain(
        "Will over {over} go for more than 8 runs?",
        Easy,
        MatchProgress,
        "over_runs",
    ),
    gated(
        "Will over {over} produce more than {predictedRuns} runs? ML score: {mlScore}/10",
        Medium,
        Prediction,
        "ml_runs_forecast",
        RunsPerOver,
        None,
        0.7,
    ),
    gated(
        "Will there be a boundary in over {over}? Risk for the bowler: {riskLevel}",
        Medium,
        Prediction,
        "ml_boundary_forecast",
        BoundaryProbability,
        Some(0.55),
        0.6,
    ),
    gated(
        "Will a wicket fall in over {over}? Confidence: {confidence}%",
        Hard,
        Prediction,
        "ml_wicket_forecast",
        WicketOccurrence,
        Some(0.6),
        0.7,
    ),
];

const MILESTONE: [TemplateDef; 4] = [
    plain(
        "Will {batsman} convert this {milestone} into a bigger score?",
        Easy,
        Milestone,
        "milestone_conversion",
    ),
    plain(
        "Will {batsman} be dismissed within 10 balls of reaching {milestone}?",
        Medium,
        PlayerPerformance,
        "post_milestone_risk",
    ),
    gated(
        "Will {batsman} celebrate the {milestone} with a boundary in the next over? Confidence: {confidence}%",
        Medium,
        Prediction,
        "ml_boundary_forecast",
        BoundaryProbability,
        Some(0.6),
        0.6,
    ),
    gated(
        "After {batsman}'s {milestone}, will the next over go for more than {predictedRuns} runs?",
        Hard,
        MatchProgress,
        "ml_runs_forecast",
        RunsPerOver,
        None,
        0.5,
    ),
];

/// Templates per event type, in presentation order.
pub struct TemplateCatalog {
    by_type: HashMap<EventType, Vec<QuestionTemplate>>,
}

impl TemplateCatalog {
    /// The built-in catalog: four templates for each supported event type.
    pub fn baseline() -> Result<Self> {
        Self::from_defs([
            (EventType::Boundary, &BOUNDARY[..]),
            (EventType::Six, &SIX[..]),
            (EventType::Wicket, &WICKET[..]),
            (EventType::NewOver, &NEW_OVER[..]),
            (EventType::Milestone, &MILESTONE[..]),
        ])
    }

    pub fn from_defs<'a>(
        defs: impl IntoIterator<Item = (EventType, &'a [TemplateDef])>,
    ) -> Result<Self> {
        let mut by_type = HashMap::new();
        for (event_type, list) in defs {
            let compiled = list
                .iter()
                .map(compile)
                .collect::<Result<Vec<_>>>()?;
            by_type.insert(event_type, compiled);
        }
        Ok(Self { by_type })
    }

    pub fn templates_for(&self, event_type: EventType) -> &[QuestionTemplate] {
        self.by_type.get(&event_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct prediction targets referenced by an event type's templates,
    /// in first-use order.
    pub fn targets_for(&self, event_type: EventType) -> Vec<PredictionTarget> {
        let mut targets = Vec::new();
        for target in self.templates_for(event_type).iter().filter_map(|t| t.ml_target) {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }
}

fn compile(def: &TemplateDef) -> Result<QuestionTemplate> {
    if def.ml_target.is_none() && def.confidence_threshold.is_some() {
        return Err(AppError::Template(format!(
            "confidence threshold without a prediction target in \"{}\"",
            def.text
        )));
    }
    if let Some(threshold) = def.confidence_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::Template(format!(
                "confidence threshold {threshold} outside [0, 1] in \"{}\"",
                def.text
            )));
        }
    }
    Ok(QuestionTemplate {
        text: def.text.to_string(),
        difficulty: def.difficulty,
        category: def.category,
        context: def.context.to_string(),
        ml_target: def.ml_target,
        confidence_threshold: def.confidence_threshold,
        prediction_weight: def.prediction_weight,
        segments: parse_template(def.text)?,
    })
}

#[cfg(test)]
impl QuestionTemplate {
    /// Compile a one-off template for tests.
    pub fn for_tests(def: TemplateDef) -> Self {
        compile(&def).unwrap()
    }
}

#[cfg(test)]
pub(crate) fn test_def(
    text: &'static str,
    ml_target: Option<PredictionTarget>,
    threshold: Option<f64>,
) -> TemplateDef {
    TemplateDef {
        text,
        difficulty: Difficulty::Medium,
        category: QuestionCategory::Prediction,
        context: "test",
        ml_target,
        confidence_threshold: threshold,
        prediction_weight: ml_target.map(|_| 0.5),
    }
}
