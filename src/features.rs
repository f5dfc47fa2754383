//! Flat feature projection of an event, shaped the way the prediction service
//! expects its `features` payload (dotted keys for nested stats).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::RawEvent;

const UNKNOWN: &str = "Unknown";

/// Match-level facts that ride along with events under `matchContext`.
/// Every field is optional upstream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchContext {
    pub venue: Option<String>,
    pub format: Option<String>,
    pub series: Option<String>,
    pub target: Option<f64>,
    pub chase: Option<bool>,
    pub powerplay: Option<bool>,
    pub death_overs: Option<bool>,
}

impl MatchContext {
    /// Pull the context out of the event's extra fields. A malformed object
    /// degrades to an empty context.
    pub fn from_event(event: &RawEvent) -> Self {
        event
            .context
            .get("matchContext")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub innings: f64,
    #[serde(rename = "overNumber")]
    pub over_number: f64,
    #[serde(rename = "overBalls")]
    pub over_balls: f64,
    #[serde(rename = "overRuns")]
    pub over_runs: f64,
    #[serde(rename = "overWickets")]
    pub over_wickets: f64,
    #[serde(rename = "overBoundaries")]
    pub over_boundaries: f64,
    #[serde(rename = "overSixes")]
    pub over_sixes: f64,
    #[serde(rename = "overExtras")]
    pub over_extras: f64,
    #[serde(rename = "totalRuns")]
    pub total_runs: f64,
    #[serde(rename = "totalWickets")]
    pub total_wickets: f64,
    #[serde(rename = "totalOvers")]
    pub total_overs: f64,
    #[serde(rename = "runRate")]
    pub run_rate: f64,
    #[serde(rename = "requiredRunRate")]
    pub required_run_rate: f64,
    #[serde(rename = "teamBatting")]
    pub team_batting: String,
    #[serde(rename = "teamBowling")]
    pub team_bowling: String,

    #[serde(rename = "batsmanStats.striker.runs")]
    pub striker_runs: f64,
    #[serde(rename = "batsmanStats.striker.balls")]
    pub striker_balls: f64,
    #[serde(rename = "batsmanStats.striker.strikeRate")]
    pub striker_strike_rate: f64,
    #[serde(rename = "batsmanStats.nonStriker.runs")]
    pub non_striker_runs: f64,
    #[serde(rename = "batsmanStats.nonStriker.balls")]
    pub non_striker_balls: f64,
    #[serde(rename = "batsmanStats.nonStriker.strikeRate")]
    pub non_striker_strike_rate: f64,

    #[serde(rename = "bowlerStats.runs")]
    pub bowler_runs: f64,
    #[serde(rename = "bowlerStats.wickets")]
    pub bowler_wickets: f64,
    #[serde(rename = "bowlerStats.balls")]
    pub bowler_balls: f64,
    #[serde(rename = "bowlerStats.dotBalls")]
    pub bowler_dot_balls: f64,
    #[serde(rename = "bowlerStats.economyRate")]
    pub bowler_economy_rate: f64,

    #[serde(rename = "momentum.recentRunRate")]
    pub recent_run_rate: f64,
    #[serde(rename = "momentum.wicketsInHand")]
    pub wickets_in_hand: f64,
    #[serde(rename = "momentum.pressureIndex")]
    pub pressure_index: f64,
    #[serde(rename = "momentum.partnershipRuns")]
    pub partnership_runs: f64,
    #[serde(rename = "momentum.partnershipBalls")]
    pub partnership_balls: f64,

    pub venue: String,
    pub format: String,
    pub series: String,
    #[serde(rename = "matchContext.target")]
    pub target: f64,
    #[serde(rename = "matchContext.chase")]
    pub chase: bool,
    #[serde(rename = "matchContext.powerplay")]
    pub powerplay: bool,
    #[serde(rename = "matchContext.deathOvers")]
    pub death_overs: bool,

    pub is_powerplay: u8,
    pub is_death_overs: u8,
    pub is_middle_overs: u8,
    pub run_rate_diff: f64,
    pub run_rate_ratio: f64,
    pub partnership_rate: f64,
    pub wickets_remaining_ratio: f64,
}

/// Stateless; kept as a type so the pipeline can hold one like its other stages.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Never fails: every missing field falls back to 0 / "Unknown" / false.
    pub fn extract(&self, event: &RawEvent, ctx: &MatchContext) -> FeatureRecord {
        let fields = &event.context;
        let num = |path: &str| lookup(fields, path).and_then(as_number).unwrap_or(0.0);
        let text = |path: &str| {
            lookup(fields, path)
                .and_then(as_text)
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        let over_number = lookup(fields, "overNumber")
            .and_then(as_number)
            .or(event.over)
            .unwrap_or(0.0);
        let total_wickets = lookup(fields, "totalWickets")
            .and_then(as_number)
            .or(event.wickets.map(f64::from))
            .unwrap_or(0.0);
        let wickets_in_hand = lookup(fields, "momentum.wicketsInHand")
            .and_then(as_number)
            .unwrap_or((10.0 - total_wickets).max(0.0));

        let run_rate = num("runRate");
        let required_run_rate = num("requiredRunRate");
        let partnership_runs = num("momentum.partnershipRuns");
        let partnership_balls = num("momentum.partnershipBalls");

        let powerplay = ctx.powerplay.unwrap_or(false);
        let death_overs = ctx.death_overs.unwrap_or(false);

        FeatureRecord {
            event_type: event.event_type.to_string(),
            innings: num("innings"),
            over_number,
            over_balls: num("overStats.balls"),
            over_runs: num("overStats.runs"),
            over_wickets: num("overStats.wickets"),
            over_boundaries: num("overStats.boundaries"),
            over_sixes: num("overStats.sixes"),
            over_extras: num("overStats.extras"),
            total_runs: num("totalRuns"),
            total_wickets,
            total_overs: num("totalOvers"),
            run_rate,
            required_run_rate,
            team_batting: text("teamBatting"),
            team_bowling: text("teamBowling"),

            striker_runs: num("batsmanStats.striker.runs"),
            striker_balls: num("batsmanStats.striker.balls"),
            striker_strike_rate: num("batsmanStats.striker.strikeRate"),
            non_striker_runs: num("batsmanStats.nonStriker.runs"),
            non_striker_balls: num("batsmanStats.nonStriker.balls"),
            non_striker_strike_rate: num("batsmanStats.nonStriker.strikeRate"),

            bowler_runs: num("bowlerStats.runs"),
            bowler_wickets: num("bowlerStats.wickets"),
            bowler_balls: num("bowlerStats.balls"),
            bowler_dot_balls: num("bowlerStats.dotBalls"),
            bowler_economy_rate: num("bowlerStats.economyRate"),

            recent_run_rate: num("momentum.recentRunRate"),
            wickets_in_hand,
            pressure_index: num("momentum.pressureIndex"),
            partnership_runs,
            partnership_balls,

            venue: ctx.venue.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            format: ctx.format.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            series: ctx.series.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            target: ctx.target.unwrap_or(0.0),
            chase: ctx.chase.unwrap_or(false),
            powerplay,
            death_overs,

            is_powerplay: u8::from(over_number <= 6.0),
            is_death_overs: u8::from(over_number >= 16.0),
            is_middle_overs: u8::from((7.0..=15.0).contains(&over_number)),
            run_rate_diff: run_rate - required_run_rate,
            run_rate_ratio: run_rate / (required_run_rate + 0.1),
            partnership_rate: partnership_runs / (partnership_balls + 1.0),
            wickets_remaining_ratio: wickets_in_hand / 10.0,
        }
    }
}

/// Follow a dotted path (`bowlerStats.economyRate`) through nested objects.
fn lookup<'a>(fields: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite())
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> RawEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn bare_event_gets_defaults_everywhere() {
        let e = event(r#"{"type":"boundary","matchId":"m1","timestamp":1}"#);
        let ctx = MatchContext::from_event(&e);
        let f = FeatureExtractor::new().extract(&e, &ctx);

        assert_eq!(f.bowler_economy_rate, 0.0);
        assert_eq!(f.venue, "Unknown");
        assert_eq!(f.team_batting, "Unknown");
        assert!(!f.chase);
        assert_eq!(f.wickets_in_hand, 10.0);
        assert_eq!(f.wickets_remaining_ratio, 1.0);
        // No over at all reads as over 0, the start of the powerplay.
        assert_eq!(f.is_powerplay, 1);

        let json = serde_json::to_value(&f).unwrap();
        assert!(json.as_object().unwrap().values().all(|v| !v.is_null()));
        assert_eq!(json["bowlerStats.economyRate"], 0.0);
        assert_eq!(json["matchContext.chase"], false);
    }

    #[test]
    fn nested_stats_and_context_are_read() {
        let e = event(
            r#"{
                "type": "wicket",
                "matchId": "m1",
                "timestamp": 1,
                "over": 17,
                "wickets": 4,
                "runRate": 8.0,
                "requiredRunRate": 9.9,
                "teamBatting": "India",
                "bowlerStats": {"economyRate": "6.5", "wickets": 2},
                "batsmanStats": {"striker": {"runs": 45, "balls": 30}},
                "momentum": {"partnershipRuns": 20, "partnershipBalls": 9},
                "matchContext": {"venue": "Wankhede", "chase": true, "target": 181}
            }"#,
        );
        let ctx = MatchContext::from_event(&e);
        let f = FeatureExtractor::new().extract(&e, &ctx);

        assert_eq!(f.over_number, 17.0);
        assert_eq!(f.is_death_overs, 1);
        assert_eq!(f.is_middle_overs, 0);
        assert_eq!(f.total_wickets, 4.0);
        assert_eq!(f.wickets_in_hand, 6.0);
        assert_eq!(f.bowler_economy_rate, 6.5);
        assert_eq!(f.bowler_wickets, 2.0);
        assert_eq!(f.striker_runs, 45.0);
        assert_eq!(f.team_batting, "India");
        assert_eq!(f.venue, "Wankhede");
        assert!(f.chase);
        assert_eq!(f.target, 181.0);
        assert!((f.run_rate_diff + 1.9).abs() < 1e-9);
        assert!((f.run_rate_ratio - 0.8).abs() < 1e-9);
        assert!((f.partnership_rate - 2.0).abs() < 1e-9);
    }

    #[test]
    fn malformed_match_context_degrades_to_empty() {
        let e = event(r#"{"type":"six","matchId":"m1","timestamp":1,"matchContext":"oops"}"#);
        assert_eq!(MatchContext::from_event(&e), MatchContext::default());
    }

    #[test]
    fn first_over_is_powerplay() {
        for over in ["0", "0.4", "6"] {
            let e = event(&format!(
                r#"{{"type":"boundary","matchId":"m1","timestamp":1,"over":{over}}}"#
            ));
            let f = FeatureExtractor::new().extract(&e, &MatchContext::from_event(&e));
            assert_eq!(f.is_powerplay, 1, "over {over}");
            assert_eq!(f.is_middle_overs, 0, "over {over}");
            assert_eq!(f.is_death_overs, 0, "over {over}");
        }

        let e = event(r#"{"type":"boundary","matchId":"m1","timestamp":1,"over":6.2}"#);
        let f = FeatureExtractor::new().extract(&e, &MatchContext::from_event(&e));
        assert_eq!(f.is_powerplay, 0);
    }
}
