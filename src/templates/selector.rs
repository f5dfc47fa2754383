use crate::templates::catalog::QuestionTemplate;
use crate::types::{PredictionSet, TargetPrediction};

/// Outcome of checking one template against the available predictions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eligibility<'a> {
    /// Usable as-is. Carries the prediction when the template is ML-backed
    /// and its confidence gate passed.
    Eligible(Option<&'a TargetPrediction>),
    /// ML-backed but no prediction for its target: resolved with fallbacks.
    EligibleDegraded,
    /// A prediction exists but fails the template's confidence gate.
    Excluded {
        confidence: Option<f64>,
        threshold: f64,
    },
}

/// A template chosen for resolution, with the prediction it will use.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    pub template: &'a QuestionTemplate,
    pub prediction: Option<&'a TargetPrediction>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateSelector;

impl TemplateSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn assess<'a>(
        &self,
        template: &QuestionTemplate,
        predictions: Option<&'a PredictionSet>,
    ) -> Eligibility<'a> {
        let Some(target) = template.ml_target else {
            return Eligibility::Eligible(None);
        };
        let Some(prediction) = predictions.and_then(|set| set.get(target.as_str())) else {
            return Eligibility::EligibleDegraded;
        };
        match template.confidence_threshold {
            None => Eligibility::Eligible(Some(prediction)),
            Some(threshold) => match prediction.confidence() {
                Some(confidence) if confidence >= threshold => {
                    Eligibility::Eligible(Some(prediction))
                }
                confidence => Eligibility::Excluded {
                    confidence,
                    threshold,
                },
            },
        }
    }

    /// Templates to resolve for one event, in catalog order. Excluded
    /// templates drop out individually; the rest of the event proceeds.
    pub fn select<'a>(
        &self,
        templates: &'a [QuestionTemplate],
        predictions: Option<&'a PredictionSet>,
    ) -> Vec<Selection<'a>> {
        templates
            .iter()
            .filter_map(|template| match self.assess(template, predictions) {
                Eligibility::Eligible(prediction) => Some(Selection {
                    template,
                    prediction,
                }),
                Eligibility::EligibleDegraded => Some(Selection {
                    template,
                    prediction: None,
                }),
                Eligibility::Excluded { .. } => None,
            })
            .collect()
    }
}
