//! Canonical entity shapes shared across the application.
//!
//! Everything provider-derived (teams, leagues, events, stats) is normalized
//! into these types at the adapter boundary and never re-shaped afterwards.
//! User-owned configuration lives in the submodules and is mutated only
//! through the persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod group;
pub mod matching;
pub mod settings;
pub mod template;

pub use group::{DuplicateMode, EventGroup, ExceptionKeyword, RawStream, TeamChannelConfig};
pub use matching::{
    CardSegment, EventMatch, MatchCacheEntry, MatchOutcome, NoMatchReason, Side, StreamFingerprint,
};
pub use settings::{CreateTiming, DeleteTiming, MidnightCrossoverMode, Settings};
pub use template::{Condition, ConditionRule, FillerConfig, FillerKind, FillerSlot, TemplateConfig};

/// Sports known to the canonical league registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sport", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Football,
    Basketball,
    Hockey,
    Baseball,
    Soccer,
    Mma,
    Rugby,
    Boxing,
    Tennis,
    Golf,
    Racing,
    Cricket,
}

impl Sport {
    /// Default programme duration when neither template nor settings override it.
    pub fn default_duration_hours(&self) -> f64 {
        match self {
            Sport::Football => 3.5,
            Sport::Basketball => 3.0,
            Sport::Hockey => 3.0,
            Sport::Baseball => 3.5,
            Sport::Soccer => 2.5,
            Sport::Mma => 5.0,
            Sport::Rugby => 2.5,
            Sport::Boxing => 4.0,
            Sport::Tennis => 3.0,
            Sport::Golf => 6.0,
            Sport::Racing => 3.0,
            Sport::Cricket => 4.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Football => "football",
            Sport::Basketball => "basketball",
            Sport::Hockey => "hockey",
            Sport::Baseball => "baseball",
            Sport::Soccer => "soccer",
            Sport::Mma => "mma",
            Sport::Rugby => "rugby",
            Sport::Boxing => "boxing",
            Sport::Tennis => "tennis",
            Sport::Golf => "golf",
            Sport::Racing => "racing",
            Sport::Cricket => "cricket",
        }
    }

    pub fn from_str_loose(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "football" => Some(Sport::Football),
            "basketball" => Some(Sport::Basketball),
            "hockey" => Some(Sport::Hockey),
            "baseball" => Some(Sport::Baseball),
            "soccer" => Some(Sport::Soccer),
            "mma" => Some(Sport::Mma),
            "rugby" => Some(Sport::Rugby),
            "boxing" => Some(Sport::Boxing),
            "tennis" => Some(Sport::Tennis),
            "golf" => Some(Sport::Golf),
            "racing" => Some(Sport::Racing),
            "cricket" => Some(Sport::Cricket),
            _ => None,
        }
    }

    /// Sports where a fixture is a tournament card rather than a two-team
    /// matchup; home/away model the main participants.
    pub fn is_tournament(&self) -> bool {
        matches!(
            self,
            Sport::Mma | Sport::Boxing | Sport::Tennis | Sport::Golf | Sport::Racing
        )
    }
}

impl std::fmt::Display for Sport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sports team as normalized from a provider.
///
/// `(provider, provider_team_id)` is globally unique; the same team may
/// participate in several leagues via the team/league cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub provider: String,
    pub provider_team_id: String,
    pub name: String,
    pub short_name: String,
    pub abbreviation: String,
    pub location: String,
    pub logo_url: Option<String>,
    pub sport: Sport,
    pub league: String,
}

/// A competition, keyed by its canonical slug (`nfl`, `eng.1`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct League {
    pub slug: String,
    pub name: String,
    pub sport: Sport,
    pub provider: String,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    InProgress,
    Final,
    Postponed,
    Canceled,
}

impl EventStatus {
    /// Ordering used by the matcher's status tie-break: live first, then
    /// scheduled, then everything else.
    pub fn match_priority(&self) -> u8 {
        match self {
            EventStatus::InProgress => 0,
            EventStatus::Scheduled => 1,
            EventStatus::Postponed => 2,
            EventStatus::Canceled => 3,
            EventStatus::Final => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonType {
    Preseason,
    RegularSeason,
    Postseason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub name: String,
    pub is_national: bool,
}

/// Betting context attached to an event when the provider carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Odds {
    /// Point spread from the favorite's perspective, e.g. -6.5
    pub spread: Option<f64>,
    pub over_under: Option<f64>,
    pub home_moneyline: Option<i32>,
    pub away_moneyline: Option<i32>,
    /// Display string of the favored side, e.g. "KC -6.5"
    pub details: Option<String>,
}

/// A single fixture. `start_time` is always UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub provider: String,
    pub provider_event_id: String,
    pub league: String,
    pub sport: Sport,
    pub start_time: DateTime<Utc>,
    pub status: EventStatus,
    pub home_team: Team,
    pub away_team: Team,
    pub short_name: Option<String>,
    pub venue: Option<String>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub broadcasts: Vec<Broadcast>,
    pub odds: Option<Odds>,
    /// Record summaries captured at game time, e.g. "10-2"
    pub home_record: Option<String>,
    pub away_record: Option<String>,
    /// Poll ranks; None when unranked
    pub home_rank: Option<u32>,
    pub away_rank: Option<u32>,
    pub season_type: Option<SeasonType>,
    pub conference_game: Option<bool>,
    /// Main-card start for split-card events (MMA, boxing)
    pub main_card_start: Option<DateTime<Utc>>,
}

impl Event {
    /// Whether `team` is one of the two competitors, by provider team id.
    pub fn involves(&self, provider_team_id: &str) -> bool {
        self.home_team.provider_team_id == provider_team_id
            || self.away_team.provider_team_id == provider_team_id
    }

    /// The competitor pair as an unordered id set check.
    pub fn competitor_ids_are(&self, a: &str, b: &str) -> bool {
        (self.home_team.provider_team_id == a && self.away_team.provider_team_id == b)
            || (self.home_team.provider_team_id == b && self.away_team.provider_team_id == a)
    }

    pub fn opponent_of(&self, provider_team_id: &str) -> Option<&Team> {
        if self.home_team.provider_team_id == provider_team_id {
            Some(&self.away_team)
        } else if self.away_team.provider_team_id == provider_team_id {
            Some(&self.home_team)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreakKind {
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Streak {
    pub kind: StreakKind,
    pub length: u32,
}

/// Team context at enrichment time. Valid only within the data service's
/// stats TTL; never persisted as historical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamStats {
    /// Overall record summary, "W-L" or "W-L-D"
    pub record: String,
    pub streak: Option<Streak>,
    pub home_record: Option<String>,
    pub away_record: Option<String>,
    pub conference: Option<String>,
    pub division: Option<String>,
    /// Poll rank; 0 means unranked
    pub rank: u32,
}

/// One XMLTV `<programme>` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Programme {
    pub channel_id: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub title: String,
    pub subtitle: Option<String>,
    pub description: String,
    pub categories: Vec<String>,
    /// True only for real events currently in progress; never set on filler
    pub live: bool,
    /// True only for real scheduled events; never set on filler
    pub new: bool,
    pub filler: Option<FillerKind>,
}

impl Programme {
    pub fn is_filler(&self) -> bool {
        self.filler.is_some()
    }
}

/// An XMLTV `<channel>` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBlock {
    pub id: String,
    pub display_name: String,
    pub icon: Option<String>,
}

/// Record of a downstream channel created for one matched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedChannel {
    pub id: uuid::Uuid,
    pub group_id: uuid::Uuid,
    /// Identity in the external manager
    pub manager_channel_id: i64,
    /// XMLTV channel id the EPG is keyed to
    pub channel_id: String,
    pub event_id: String,
    pub league: String,
    pub home_team_name: String,
    pub away_team_name: String,
    /// None means manual deletion only
    pub scheduled_delete_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Aborted,
    Failed,
}

/// Counters accumulated over one generation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounters {
    pub programmes_emitted: i64,
    pub events_processed: i64,
    pub streams_matched: i64,
    pub streams_unmatched: i64,
    pub channels_created: i64,
    pub channels_deleted: i64,
    pub unresolved_variables: i64,
}

/// Audit record of one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub generation: i64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counters: RunCounters,
    /// Human-readable issues surfaced to the report (skipped teams,
    /// unmatched streams, manager failures, unresolved variables)
    pub issues: Vec<String>,
}
