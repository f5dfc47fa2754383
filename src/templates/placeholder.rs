use crate::error::{AppError, Result};

/// Placeholders filled from the raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Batsman,
    Bowler,
    Runs,
    Wickets,
    Over,
    Milestone,
}

/// Placeholders filled from model output, or a fixed fallback without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionField {
    Confidence,
    Probability,
    MlScore,
    PredictedRuns,
    PredictedBoundaries,
    PredictedSixes,
    PredictedWickets,
    RiskLevel,
    Analysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Event(EventField),
    Prediction(PredictionField),
}

impl Placeholder {
    pub fn from_name(name: &str) -> Option<Self> {
        use EventField as E;
        use PredictionField as P;
        let p = match name {
            "batsman" => Placeholder::Event(E::Batsman),
            "bowler" => Placeholder::Event(E::Bowler),
            "runs" => Placeholder::Event(E::Runs),
            "wickets" => Placeholder::Event(E::Wickets),
            "over" => Placeholder::Event(E::Over),
            "milestone" => Placeholder::Event(E::Milestone),
            "confidence" => Placeholder::Prediction(P::Confidence),
            "probability" => Placeholder::Prediction(P::Probability),
            "mlScore" => Placeholder::Prediction(P::MlScore),
            "predictedRuns" => Placeholder::Prediction(P::PredictedRuns),
            "predictedBoundaries" => Placeholder::Prediction(P::PredictedBoundaries),
            "predictedSixes" => Placeholder::Prediction(P::PredictedSixes),
            "predictedWickets" => Placeholder::Prediction(P::PredictedWickets),
            "riskLevel" => Placeholder::Prediction(P::RiskLevel),
            "analysis" => Placeholder::Prediction(P::Analysis),
            _ => return None,
        };
        Some(p)
    }
}

/// A parsed template is literal text interleaved with placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Split a template into segments. Unknown `{names}` and unbalanced braces are
/// rejected here so that nothing unresolvable can reach the resolver.
pub fn parse_template(text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(['{', '}']) {
        if rest[open..].starts_with('}') {
            return Err(AppError::Template(format!("unbalanced '}}' in template \"{text}\"")));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| AppError::Template(format!("unclosed '{{' in template \"{text}\"")))?;
        let name = &after[..close];
        let placeholder = Placeholder::from_name(name).ok_or_else(|| {
            AppError::Template(format!("unknown placeholder {{{name}}} in template \"{text}\""))
        })?;

        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        segments.push(Segment::Placeholder(placeholder));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// True when `text` still contains a recognised `{placeholder}` token.
pub fn contains_placeholder_token(text: &str) -> bool {
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if Placeholder::from_name(&after[..close]).is_some() => return true,
            Some(_) => rest = after,
            None => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_literals_and_placeholders() {
        let segments = parse_template("Will {batsman} score? Confidence: {confidence}%").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("Will ".into()),
                Segment::Placeholder(Placeholder::Event(EventField::Batsman)),
                Segment::Literal(" score? Confidence: ".into()),
                Segment::Placeholder(Placeholder::Prediction(PredictionField::Confidence)),
                Segment::Literal("%".into()),
            ]
        );
    }

    #[test]
    fn adjacent_placeholders_and_no_literals() {
        let segments = parse_template("{runs}{over}").unwrap();
        assert_eq!(segments.len(), 2);
        assert!(parse_template("").unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_and_unbalanced_tokens() {
        assert!(matches!(parse_template("Hi {captain}"), Err(AppError::Template(_))));
        assert!(matches!(parse_template("Hi {batsman"), Err(AppError::Template(_))));
        assert!(matches!(parse_template("Hi batsman}"), Err(AppError::Template(_))));
    }

    #[test]
    fn detects_leftover_tokens_only_when_recognised() {
        assert!(contains_placeholder_token("Confidence: {confidence}%"));
        assert!(!contains_placeholder_token("Confidence: 60%"));
        assert!(!contains_placeholder_token("set notation {a, b}"));
        assert!(contains_placeholder_token("{x} then {bowler}"));
    }
}
