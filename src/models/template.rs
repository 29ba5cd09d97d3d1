//! Template configuration: title/description patterns, conditional rules,
//! and filler formatting.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority reserved for default rules that always match.
pub const DEFAULT_RULE_PRIORITY: i64 = 100;

/// Formatting rules applied when rendering programmes for a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub id: Uuid,
    pub name: String,
    pub title_template: String,
    pub subtitle_template: Option<String>,
    /// Conditional description rules, evaluated ascending by priority
    pub description_rules: Vec<ConditionRule>,
    pub filler: FillerConfig,
    pub categories: Vec<String>,
    /// Pattern used when the reconciler names downstream channels
    pub channel_name_template: Option<String>,
    /// Overrides the per-sport duration when set
    pub duration_hours: Option<f64>,
}

impl TemplateConfig {
    /// The built-in template used when a channel or group has none assigned.
    pub fn fallback() -> Self {
        Self {
            id: Uuid::nil(),
            name: "default".to_string(),
            title_template: "{away} at {home}".to_string(),
            subtitle_template: Some("{league}".to_string()),
            description_rules: vec![ConditionRule {
                id: Uuid::nil(),
                condition: None,
                priority: DEFAULT_RULE_PRIORITY,
                template: "{team} ({record}) takes on {opponent} ({opponent_record}).".to_string(),
            }],
            filler: FillerConfig::default(),
            categories: vec!["Sports".to_string()],
            channel_name_template: None,
            duration_hours: None,
        }
    }
}

/// One conditional description rule.
///
/// `condition: None` on a priority-100 rule makes it a default; on any other
/// priority the rule never matches (an unknown condition kind parses to the
/// same state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    pub id: Uuid,
    pub condition: Option<Condition>,
    /// In [1, 100]; 100 is reserved for defaults
    pub priority: i64,
    pub template: String,
}

impl ConditionRule {
    pub fn is_default(&self) -> bool {
        self.priority >= DEFAULT_RULE_PRIORITY
    }
}

/// Closed set of condition kinds evaluated against the render context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    IsHome,
    IsAway,
    WinStreakAtLeast(u32),
    LossStreakAtLeast(u32),
    HomeWinStreakAtLeast(u32),
    HomeLossStreakAtLeast(u32),
    AwayWinStreakAtLeast(u32),
    AwayLossStreakAtLeast(u32),
    IsPlayoff,
    IsPreseason,
    HasOdds,
    /// Opponent ranked 1..=25
    IsRankedOpponent,
    /// Both teams ranked 1..=10
    IsTopTenMatchup,
    OpponentNameContains(String),
    IsNationalBroadcast,
    IsConferenceGame,
}

impl Condition {
    /// Parse the persisted `(kind, value)` pair. Unknown kinds and missing
    /// required values yield `None`, which never matches.
    pub fn parse(kind: &str, value: Option<&str>) -> Option<Self> {
        let int = || value.and_then(|v| v.trim().parse::<u32>().ok());
        match kind {
            "is_home" => Some(Condition::IsHome),
            "is_away" => Some(Condition::IsAway),
            "win_streak" => int().map(Condition::WinStreakAtLeast),
            "loss_streak" => int().map(Condition::LossStreakAtLeast),
            "home_win_streak" => int().map(Condition::HomeWinStreakAtLeast),
            "home_loss_streak" => int().map(Condition::HomeLossStreakAtLeast),
            "away_win_streak" => int().map(Condition::AwayWinStreakAtLeast),
            "away_loss_streak" => int().map(Condition::AwayLossStreakAtLeast),
            "is_playoff" => Some(Condition::IsPlayoff),
            "is_preseason" => Some(Condition::IsPreseason),
            "has_odds" => Some(Condition::HasOdds),
            "is_ranked_opponent" => Some(Condition::IsRankedOpponent),
            "is_top_ten_matchup" => Some(Condition::IsTopTenMatchup),
            "opponent_name_contains" => value
                .filter(|v| !v.trim().is_empty())
                .map(|v| Condition::OpponentNameContains(v.trim().to_string())),
            "is_national_broadcast" => Some(Condition::IsNationalBroadcast),
            "is_conference_game" => Some(Condition::IsConferenceGame),
            _ => None,
        }
    }

    /// The persisted `(kind, value)` pair for this condition.
    pub fn to_kind_value(&self) -> (&'static str, Option<String>) {
        match self {
            Condition::IsHome => ("is_home", None),
            Condition::IsAway => ("is_away", None),
            Condition::WinStreakAtLeast(n) => ("win_streak", Some(n.to_string())),
            Condition::LossStreakAtLeast(n) => ("loss_streak", Some(n.to_string())),
            Condition::HomeWinStreakAtLeast(n) => ("home_win_streak", Some(n.to_string())),
            Condition::HomeLossStreakAtLeast(n) => ("home_loss_streak", Some(n.to_string())),
            Condition::AwayWinStreakAtLeast(n) => ("away_win_streak", Some(n.to_string())),
            Condition::AwayLossStreakAtLeast(n) => ("away_loss_streak", Some(n.to_string())),
            Condition::IsPlayoff => ("is_playoff", None),
            Condition::IsPreseason => ("is_preseason", None),
            Condition::HasOdds => ("has_odds", None),
            Condition::IsRankedOpponent => ("is_ranked_opponent", None),
            Condition::IsTopTenMatchup => ("is_top_ten_matchup", None),
            Condition::OpponentNameContains(s) => ("opponent_name_contains", Some(s.clone())),
            Condition::IsNationalBroadcast => ("is_national_broadcast", None),
            Condition::IsConferenceGame => ("is_conference_game", None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillerKind {
    Pregame,
    Postgame,
    Idle,
}

impl FillerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillerKind::Pregame => "pregame",
            FillerKind::Postgame => "postgame",
            FillerKind::Idle => "idle",
        }
    }
}

/// Per-kind filler formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerSlot {
    pub enabled: bool,
    pub title_template: String,
    pub description_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerConfig {
    pub pregame: FillerSlot,
    pub postgame: FillerSlot,
    pub idle: FillerSlot,
}

impl FillerConfig {
    pub fn slot(&self, kind: FillerKind) -> &FillerSlot {
        match kind {
            FillerKind::Pregame => &self.pregame,
            FillerKind::Postgame => &self.postgame,
            FillerKind::Idle => &self.idle,
        }
    }
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            pregame: FillerSlot {
                enabled: true,
                title_template: "Up Next: {matchup.next}".to_string(),
                description_template: "Coming up: {team} plays {opponent.next} at {time.next}."
                    .to_string(),
            },
            postgame: FillerSlot {
                enabled: true,
                title_template: "Postgame: {matchup.last}".to_string(),
                description_template: "Recap of {matchup.last}. Final score {score.last}."
                    .to_string(),
            },
            idle: FillerSlot {
                enabled: false,
                title_template: "{team} Programming".to_string(),
                description_template: "No game today. Next up: {matchup.next} on {date.next}."
                    .to_string(),
            },
        }
    }
}
