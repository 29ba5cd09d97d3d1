//! Stream-matching value types: fingerprints, cache entries, and outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Entries this many generations unseen are purged after a run.
pub const MATCH_CACHE_MAX_AGE_GENERATIONS: i64 = 5;

/// Stable identity of an input stream: `sha256(group_id ‖ stream_id ‖ name)`.
///
/// Any change to the displayed name yields a new fingerprint and therefore a
/// fresh match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFingerprint(String);

impl StreamFingerprint {
    pub fn compute(group_id: &Uuid, stream_id: &str, stream_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(group_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(stream_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(stream_name.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rehydrate a fingerprint previously stored via `as_str`.
    pub fn from_stored(hex: String) -> Self {
        Self(hex)
    }
}

impl std::fmt::Display for StreamFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted fingerprint → event mapping, aged by generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCacheEntry {
    pub fingerprint: StreamFingerprint,
    pub event_id: String,
    pub league: String,
    pub last_seen_generation: i64,
    pub created_at: DateTime<Utc>,
}

/// Which side of the game indicator a token string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Card segment detected on single-event-league streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardSegment {
    Prelims,
    MainCard,
}

/// A successful stream → event resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMatch {
    pub event_id: String,
    pub league: String,
    /// Combined confidence of the winning team pair, or 1.0 for cache hits
    /// and single-event matches
    pub confidence: f64,
    /// Whether the stream's side ordering agreed with the event's
    /// home/away orientation
    pub orientation_agrees: bool,
    pub card_segment: Option<CardSegment>,
    /// True when served from the fingerprint cache
    pub from_cache: bool,
}

/// Why a stream failed to match. A value, not an error: the run continues
/// and the reason is surfaced in the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    /// No game indicator and no single-event league keyword
    NoIndicator,
    /// One side never resolved to a team in any candidate league
    UnknownTeam(Side),
    /// No league contains both teams
    NoCandidateLeague,
    /// Teams resolved but no event in the match window
    NoEventFound,
    /// Multiple events tie beyond every tie-breaker
    Ambiguous,
}

impl std::fmt::Display for NoMatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoMatchReason::NoIndicator => f.write_str("no_indicator"),
            NoMatchReason::UnknownTeam(side) => write!(f, "unknown_team({side})"),
            NoMatchReason::NoCandidateLeague => f.write_str("no_candidate_league"),
            NoMatchReason::NoEventFound => f.write_str("no_event_found"),
            NoMatchReason::Ambiguous => f.write_str("ambiguous"),
        }
    }
}

/// Outcome of one match attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MatchOutcome {
    Match(EventMatch),
    NoMatch(NoMatchReason),
}

impl MatchOutcome {
    pub fn as_match(&self) -> Option<&EventMatch> {
        match self {
            MatchOutcome::Match(m) => Some(m),
            MatchOutcome::NoMatch(_) => None,
        }
    }
}
