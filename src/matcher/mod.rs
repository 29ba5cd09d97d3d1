//! Stream → event matching.
//!
//! Resolves an opaque stream name into a concrete fixture: normalize, split
//! on the game indicator, pick candidate leagues, run the tiered team match
//! on both sides, then resolve the winning pair against the league's event
//! universe. Single-event leagues (one card per day) match on league
//! keywords alone. Every attempt consults the fingerprint cache first.
//!
//! The matcher never fails on unmatched input: it returns
//! [`MatchOutcome::NoMatch`] with a reason and the run carries on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::database::Database;
use crate::errors::AppError;
use crate::models::{
    CardSegment, Event, EventGroup, EventMatch, MatchCacheEntry, MatchOutcome, NoMatchReason,
    RawStream, Side, Sport, StreamFingerprint, Team,
};
use crate::services::{SportsDataService, TeamLeagueIndex};

pub mod normalize;

use normalize::{normalize_name, normalize_stream, NormalizedStream};

/// Leagues that hold at most one event per day, matchable by keyword alone.
struct SingleEventLeague {
    league: &'static str,
    keywords: &'static [&'static str],
}

const SINGLE_EVENT_LEAGUES: &[SingleEventLeague] = &[
    SingleEventLeague { league: "ufc", keywords: &["ufc", "fight night"] },
    SingleEventLeague { league: "pga", keywords: &["pga", "golf"] },
    SingleEventLeague { league: "f1", keywords: &["f1", "formula 1", "grand prix"] },
];

/// Tiered confidence scores; aliases resolve at 1.0 ahead of tier 1.
const CONFIDENCE_EXACT: f64 = 1.0;
const CONFIDENCE_SUFFIX_STRIPPED: f64 = 0.95;
const CONFIDENCE_PREFIX: f64 = 0.90;
const CONFIDENCE_WORD_CONTAINMENT: f64 = 0.85;
const CONFIDENCE_WORD_OVERLAP: f64 = 0.75;
const WORD_OVERLAP_THRESHOLD: f64 = 0.6;

/// Per-run matching context.
pub struct MatchContext<'a> {
    pub group: &'a EventGroup,
    pub generation: i64,
    pub now: DateTime<Utc>,
    pub timezone: Tz,
    pub days_ahead: i64,
}

pub struct StreamMatcher {
    data: Arc<SportsDataService>,
    index: Arc<TeamLeagueIndex>,
    db: Database,
    /// `(league, lowercased alias) → provider team id`
    aliases: HashMap<(String, String), String>,
    region_tokens: Vec<String>,
}

struct SideMatch {
    team: Arc<Team>,
    confidence: f64,
}

struct LeaguePair {
    league: String,
    order: usize,
    left: SideMatch,
    right: SideMatch,
}

impl LeaguePair {
    fn combined(&self) -> f64 {
        self.left.confidence + self.right.confidence
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Indicator {
    /// `away at home` convention
    At,
    /// `home versus away` convention
    Versus,
}

impl StreamMatcher {
    pub fn new(
        data: Arc<SportsDataService>,
        index: Arc<TeamLeagueIndex>,
        db: Database,
        aliases: HashMap<(String, String), String>,
        region_tokens: Vec<String>,
    ) -> Self {
        Self {
            data,
            index,
            db,
            aliases,
            region_tokens,
        }
    }

    /// Resolve one stream. Cache hits still re-fetch the event through the
    /// data service so scores/odds/status are current.
    pub async fn match_stream(
        &self,
        stream: &RawStream,
        ctx: &MatchContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<MatchOutcome, AppError> {
        let fingerprint =
            StreamFingerprint::compute(&stream.group_id, &stream.stream_id, &stream.name);
        let normalized =
            normalize_stream(&stream.name, &self.region_tokens, ctx.now.date_naive());

        if let Some(cached) = self.db.get_match_cache_entry(&fingerprint).await.map_err(db_err)? {
            let event = self
                .data
                .event(&cached.event_id, &cached.league, cancel)
                .await?;
            if event.is_some() {
                self.db
                    .touch_match_cache_entry(&fingerprint, ctx.generation)
                    .await
                    .map_err(db_err)?;
                debug!(fingerprint = %fingerprint, "Fingerprint cache hit");
                return Ok(MatchOutcome::Match(EventMatch {
                    event_id: cached.event_id,
                    league: cached.league,
                    confidence: CONFIDENCE_EXACT,
                    orientation_agrees: true,
                    card_segment: detect_card_segment(&normalized.text),
                    from_cache: true,
                }));
            }
            // The cached event no longer exists upstream; rematch from scratch
        }

        let outcome = self.match_full(&normalized, ctx, cancel).await?;

        if let MatchOutcome::Match(event_match) = &outcome {
            self.db
                .upsert_match_cache_entry(&MatchCacheEntry {
                    fingerprint,
                    event_id: event_match.event_id.clone(),
                    league: event_match.league.clone(),
                    last_seen_generation: ctx.generation,
                    created_at: ctx.now,
                })
                .await
                .map_err(db_err)?;
        }

        Ok(outcome)
    }

    async fn match_full(
        &self,
        normalized: &NormalizedStream,
        ctx: &MatchContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<MatchOutcome, AppError> {
        let Some((indicator, left, right)) = split_on_indicator(&normalized.text) else {
            return self.match_single_event(normalized, ctx, cancel).await;
        };

        let candidates = self.candidate_leagues(&left, &right, normalized, ctx);
        if candidates.is_empty() {
            return Ok(MatchOutcome::NoMatch(NoMatchReason::NoCandidateLeague));
        }

        let mut pairs = Vec::new();
        let mut left_matched_anywhere = false;
        let mut right_matched_anywhere = false;

        for (order, league) in candidates.iter().enumerate() {
            let left_match = self.match_side(&left, league);
            let right_match = self.match_side(&right, league);
            left_matched_anywhere |= left_match.is_some();
            right_matched_anywhere |= right_match.is_some();

            if let (Some(left), Some(right)) = (left_match, right_match) {
                if left.team.provider_team_id != right.team.provider_team_id {
                    pairs.push(LeaguePair {
                        league: league.clone(),
                        order,
                        left,
                        right,
                    });
                }
            }
        }

        if pairs.is_empty() {
            let reason = if !left_matched_anywhere {
                NoMatchReason::UnknownTeam(Side::Left)
            } else if !right_matched_anywhere {
                NoMatchReason::UnknownTeam(Side::Right)
            } else {
                NoMatchReason::NoCandidateLeague
            };
            return Ok(MatchOutcome::NoMatch(reason));
        }

        // Highest combined confidence first, configured order within a tier
        pairs.sort_by(|a, b| {
            b.combined()
                .partial_cmp(&a.combined())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.order.cmp(&b.order))
        });

        // Walk one confidence tier at a time: every equally-confident league
        // is resolved, and orientation agreement outranks configured order
        // among them
        let mut start = 0;
        while start < pairs.len() {
            let confidence = pairs[start].combined();
            let end = start
                + pairs[start..]
                    .iter()
                    .take_while(|p| p.combined() == confidence)
                    .count();

            let mut best: Option<(&LeaguePair, Arc<Event>, bool)> = None;
            let mut ambiguous = false;
            for pair in &pairs[start..end] {
                match self
                    .resolve_event(pair, indicator, normalized, ctx, cancel)
                    .await?
                {
                    EventResolution::Matched(event, orientation_agrees) => {
                        let upgrade = match &best {
                            None => true,
                            Some((_, _, best_agrees)) => orientation_agrees && !best_agrees,
                        };
                        if upgrade {
                            best = Some((pair, event, orientation_agrees));
                        }
                    }
                    EventResolution::Ambiguous => ambiguous = true,
                    EventResolution::NotFound => {}
                }
            }

            if let Some((pair, event, orientation_agrees)) = best {
                return Ok(MatchOutcome::Match(EventMatch {
                    event_id: event.provider_event_id.clone(),
                    league: pair.league.clone(),
                    confidence: pair.combined() / 2.0,
                    orientation_agrees,
                    card_segment: None,
                    from_cache: false,
                }));
            }
            if ambiguous {
                return Ok(MatchOutcome::NoMatch(NoMatchReason::Ambiguous));
            }
            start = end;
        }

        Ok(MatchOutcome::NoMatch(NoMatchReason::NoEventFound))
    }

    /// Candidate set: the group's configured leagues when present, otherwise
    /// leagues where both names plausibly exist. A league-prefix hint from
    /// the stream moves its league to the front.
    fn candidate_leagues(
        &self,
        left: &str,
        right: &str,
        normalized: &NormalizedStream,
        ctx: &MatchContext<'_>,
    ) -> Vec<String> {
        let mut leagues = if !ctx.group.league_selectors.is_empty() {
            self.index.expand_groups(&ctx.group.league_selectors)
        } else {
            self.index
                .candidate_leagues(left, right)
                .into_iter()
                .map(|(league, _)| league)
                .collect()
        };

        if let Some(hint) = &normalized.league_hint {
            if let Some(position) = leagues.iter().position(|l| l == hint) {
                let hinted = leagues.remove(position);
                leagues.insert(0, hinted);
            }
        }
        leagues
    }

    /// Tiered team match for one side within one league. User aliases win
    /// outright; otherwise the first tier to succeed decides confidence.
    fn match_side(&self, side: &str, league: &str) -> Option<SideMatch> {
        let side = side.trim();
        if side.is_empty() {
            return None;
        }

        let teams = self.index.teams_in(league);

        if let Some(team_id) = self
            .aliases
            .get(&(league.to_string(), side.to_string()))
        {
            if let Some(team) = teams
                .iter()
                .find(|t| t.provider_team_id == *team_id)
            {
                return Some(SideMatch {
                    team: team.clone(),
                    confidence: CONFIDENCE_EXACT,
                });
            }
        }

        let mut best: Option<SideMatch> = None;
        for team in teams {
            if let Some(confidence) = score_team(side, team) {
                let better = best
                    .as_ref()
                    .map(|b| confidence > b.confidence)
                    .unwrap_or(true);
                if better {
                    best = Some(SideMatch {
                        team: team.clone(),
                        confidence,
                    });
                    if confidence >= CONFIDENCE_EXACT {
                        break;
                    }
                }
            }
        }
        best
    }

    /// Find the event whose competitor set equals the matched pair, applying
    /// date, rank-corroboration, time, status, and soonest-start tie-breaks
    /// in that order.
    async fn resolve_event(
        &self,
        pair: &LeaguePair,
        indicator: Indicator,
        normalized: &NormalizedStream,
        ctx: &MatchContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<EventResolution, AppError> {
        let events = self
            .events_for_pair(pair, ctx, cancel)
            .await?;

        let window_end = ctx.now + Duration::days(ctx.days_ahead);
        let mut candidates: Vec<Arc<Event>> = events
            .into_iter()
            .filter(|e| {
                e.competitor_ids_are(
                    &pair.left.team.provider_team_id,
                    &pair.right.team.provider_team_id,
                )
            })
            .filter(|e| e.start_time <= window_end)
            .filter(|e| match e.status {
                crate::models::EventStatus::Final => ctx.group.include_final,
                _ => true,
            })
            .collect();

        // Explicit date on the stream must agree with the event's local date
        if let Some(date) = normalized.date {
            candidates.retain(|e| local_date(e.start_time, ctx.timezone) == date);
        }

        if candidates.is_empty() {
            return Ok(EventResolution::NotFound);
        }

        // Ranking tokens on the stream corroborate candidates carrying the
        // same poll rank; candidates lacking it only survive when none match
        if !normalized.ranks.is_empty() && candidates.len() > 1 {
            let corroborated: Vec<Arc<Event>> = candidates
                .iter()
                .filter(|e| {
                    normalized.ranks.iter().any(|rank| {
                        e.home_rank == Some(*rank) || e.away_rank == Some(*rank)
                    })
                })
                .cloned()
                .collect();
            if !corroborated.is_empty() {
                candidates = corroborated;
            }
        }

        // Explicit time: closest start wins
        if let Some(time) = normalized.time {
            candidates.sort_by_key(|e| time_distance(e.start_time, time, ctx.timezone));
            candidates.truncate(1);
        }

        candidates.sort_by(|a, b| {
            a.status
                .match_priority()
                .cmp(&b.status.match_priority())
                .then(a.start_time.cmp(&b.start_time))
                .then(a.provider_event_id.cmp(&b.provider_event_id))
        });

        if candidates.len() > 1
            && candidates[0].status == candidates[1].status
            && candidates[0].start_time == candidates[1].start_time
        {
            return Ok(EventResolution::Ambiguous);
        }

        let event = candidates.remove(0);
        let orientation_agrees = match indicator {
            Indicator::At => {
                event.away_team.provider_team_id == pair.left.team.provider_team_id
                    && event.home_team.provider_team_id == pair.right.team.provider_team_id
            }
            Indicator::Versus => {
                event.home_team.provider_team_id == pair.left.team.provider_team_id
                    && event.away_team.provider_team_id == pair.right.team.provider_team_id
            }
        };
        Ok(EventResolution::Matched(event, orientation_agrees))
    }

    /// Event universe for a pair: the matched team's schedule, with a
    /// per-date scoreboard fallback for soccer (whose schedule endpoints
    /// drop future fixtures) and for empty schedules.
    async fn events_for_pair(
        &self,
        pair: &LeaguePair,
        ctx: &MatchContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<Event>>, AppError> {
        let is_soccer = pair.left.team.sport == Sport::Soccer;

        if !is_soccer {
            let schedule = self
                .data
                .team_schedule(
                    &pair.left.team.provider_team_id,
                    &pair.league,
                    ctx.days_ahead,
                    cancel,
                )
                .await?;
            if !schedule.is_empty() {
                return Ok(schedule.iter().cloned().map(Arc::new).collect());
            }
        }

        let mut events = Vec::new();
        for offset in 0..=ctx.days_ahead {
            let date = ctx.now.date_naive() + Duration::days(offset);
            let day_events = self.data.events_on(&pair.league, date, cancel).await?;
            events.extend(day_events.iter().cloned().map(Arc::new));
        }
        Ok(events)
    }

    /// Keyword-only path for leagues holding at most one event per day.
    async fn match_single_event(
        &self,
        normalized: &NormalizedStream,
        ctx: &MatchContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<MatchOutcome, AppError> {
        let configured = if ctx.group.league_selectors.is_empty() {
            None
        } else {
            Some(self.index.expand_groups(&ctx.group.league_selectors))
        };

        for def in SINGLE_EVENT_LEAGUES {
            if let Some(configured) = &configured {
                if !configured.iter().any(|l| l == def.league) {
                    continue;
                }
            }
            if !def
                .keywords
                .iter()
                .any(|keyword| contains_phrase(&normalized.text, keyword))
            {
                continue;
            }

            let mut events = Vec::new();
            for offset in 0..=ctx.days_ahead {
                let date = ctx.now.date_naive() + Duration::days(offset);
                let day_events = self.data.events_on(def.league, date, cancel).await?;
                events.extend(day_events.iter().cloned());
            }
            events.retain(|e| match e.status {
                crate::models::EventStatus::Final => ctx.group.include_final,
                _ => true,
            });
            if let Some(date) = normalized.date {
                events.retain(|e| local_date(e.start_time, ctx.timezone) == date);
            }

            if events.len() == 1 {
                let event = &events[0];
                return Ok(MatchOutcome::Match(EventMatch {
                    event_id: event.provider_event_id.clone(),
                    league: def.league.to_string(),
                    confidence: CONFIDENCE_EXACT,
                    orientation_agrees: true,
                    card_segment: detect_card_segment(&normalized.text),
                    from_cache: false,
                }));
            }
        }

        Ok(MatchOutcome::NoMatch(NoMatchReason::NoIndicator))
    }
}

enum EventResolution {
    Matched(Arc<Event>, bool),
    Ambiguous,
    NotFound,
}

fn db_err(e: anyhow::Error) -> AppError {
    AppError::internal(format!("match cache access: {e}"))
}

/// Leftmost game indicator, with the stream text split around it.
fn split_on_indicator(text: &str) -> Option<(Indicator, String, String)> {
    let at = text.find(" at ");
    let versus = text.find(" versus ");

    let (position, indicator, len) = match (at, versus) {
        (Some(a), Some(v)) if v < a => (v, Indicator::Versus, " versus ".len()),
        (Some(a), _) => (a, Indicator::At, " at ".len()),
        (None, Some(v)) => (v, Indicator::Versus, " versus ".len()),
        (None, None) => return None,
    };

    let left = text[..position].trim().to_string();
    let right = text[position + len..].trim().to_string();
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some((indicator, left, right))
}

fn detect_card_segment(text: &str) -> Option<CardSegment> {
    if text.contains("prelim") {
        Some(CardSegment::Prelims)
    } else if text.contains("main") {
        Some(CardSegment::MainCard)
    } else {
        None
    }
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    format!(" {text} ").contains(&format!(" {phrase} "))
}

fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

fn time_distance(start: DateTime<Utc>, target: NaiveTime, tz: Tz) -> i64 {
    let local = start.with_timezone(&tz).time();
    let diff = (local - target).num_minutes().abs();
    // Times wrap; 23:00 vs 01:00 is two hours apart, not twenty-two
    diff.min(24 * 60 - diff)
}

fn strip_trailing_number(name: &str) -> &str {
    let trimmed = name.trim_end();
    let without = trimmed.trim_end_matches(|c: char| c.is_ascii_digit());
    if without.len() < trimmed.len() && without.ends_with(' ') {
        without.trim_end()
    } else {
        trimmed
    }
}

fn word_prefix(longer: &str, shorter: &str) -> bool {
    longer.starts_with(shorter)
        && longer[shorter.len()..]
            .chars()
            .next()
            .map(|c| c == ' ')
            .unwrap_or(true)
}

/// Tiered check of one token string against one team. Returns the
/// confidence of the first tier that matches.
fn score_team(side: &str, team: &Team) -> Option<f64> {
    let side = normalize_name(side);
    if side.is_empty() {
        return None;
    }

    let fields: Vec<String> = [
        team.name.as_str(),
        team.short_name.as_str(),
        team.abbreviation.as_str(),
        team.location.as_str(),
    ]
    .iter()
    .map(|f| normalize_name(f))
    .filter(|f| !f.is_empty())
    .collect();

    // Tier 1: exact equality on any identity field
    if fields.iter().any(|f| *f == side) {
        return Some(CONFIDENCE_EXACT);
    }

    // Tier 2: equality after stripping trailing year/number suffixes
    let side_stripped = strip_trailing_number(&side);
    if fields
        .iter()
        .any(|f| strip_trailing_number(f) == side_stripped)
    {
        return Some(CONFIDENCE_SUFFIX_STRIPPED);
    }

    // Tier 3: word-boundary prefix, either direction
    if fields
        .iter()
        .any(|f| word_prefix(f, &side) || word_prefix(&side, f))
    {
        return Some(CONFIDENCE_PREFIX);
    }

    // Tier 4: whole-word containment, either direction
    if fields
        .iter()
        .any(|f| contains_phrase(f, &side) || contains_phrase(&side, f))
    {
        return Some(CONFIDENCE_WORD_CONTAINMENT);
    }

    // Tier 5: word-set overlap against the canonical name
    let name_words: std::collections::HashSet<&str> =
        fields.first().map(|f| f.split(' ').collect()).unwrap_or_default();
    if !name_words.is_empty() {
        let side_words: std::collections::HashSet<&str> = side.split(' ').collect();
        let overlap = name_words.intersection(&side_words).count() as f64;
        if overlap / name_words.len() as f64 >= WORD_OVERLAP_THRESHOLD {
            return Some(CONFIDENCE_WORD_OVERLAP);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(name: &str, short: &str, abbr: &str, location: &str) -> Team {
        Team {
            provider: "espn".to_string(),
            provider_team_id: "1".to_string(),
            name: name.to_string(),
            short_name: short.to_string(),
            abbreviation: abbr.to_string(),
            location: location.to_string(),
            logo_url: None,
            sport: Sport::Football,
            league: "nfl".to_string(),
        }
    }

    #[test]
    fn indicator_split_prefers_leftmost() {
        let (indicator, left, right) = split_on_indicator("giants at patriots").unwrap();
        assert!(matches!(indicator, Indicator::At));
        assert_eq!(left, "giants");
        assert_eq!(right, "patriots");

        let (indicator, left, right) =
            split_on_indicator("spurs versus arsenal at home").unwrap();
        assert!(matches!(indicator, Indicator::Versus));
        assert_eq!(left, "spurs");
        assert_eq!(right, "arsenal at home");

        assert!(split_on_indicator("ufc fight night prelims").is_none());
        assert!(split_on_indicator("at patriots").is_none());
    }

    #[test]
    fn tier1_exact_identity_fields() {
        let patriots = team("New England Patriots", "Patriots", "NE", "New England");
        assert_eq!(score_team("patriots", &patriots), Some(CONFIDENCE_EXACT));
        assert_eq!(score_team("ne", &patriots), Some(CONFIDENCE_EXACT));
        assert_eq!(
            score_team("new england patriots", &patriots),
            Some(CONFIDENCE_EXACT)
        );
        assert_eq!(
            score_team("new england", &patriots),
            Some(CONFIDENCE_EXACT)
        );
    }

    #[test]
    fn tier2_trailing_number_suffix() {
        let heidenheim = team("FC Heidenheim 1846", "Heidenheim", "HDH", "Heidenheim");
        assert_eq!(
            score_team("fc heidenheim", &heidenheim),
            Some(CONFIDENCE_SUFFIX_STRIPPED)
        );
    }

    #[test]
    fn tier3_word_boundary_prefix() {
        let wolves = team("Wolverhampton Wanderers", "Wolves", "WOL", "Wolverhampton");
        assert_eq!(
            score_team("wolverhampton wanderers fc", &wolves),
            Some(CONFIDENCE_PREFIX)
        );
        // Not a word-boundary prefix
        assert_ne!(score_team("wolv", &wolves), Some(CONFIDENCE_PREFIX));
    }

    #[test]
    fn tier4_whole_word_containment() {
        let state = team("Ohio State Buckeyes", "Buckeyes", "OSU", "Ohio State");
        assert_eq!(
            score_team("the ohio state buckeyes football", &state),
            Some(CONFIDENCE_WORD_CONTAINMENT)
        );
    }

    #[test]
    fn tier5_word_overlap() {
        let united = team("Manchester United", "Man United", "MUN", "Manchester");
        // "united manchester reds": 2 of 2 canonical words present
        assert_eq!(
            score_team("united manchester reds", &united),
            Some(CONFIDENCE_WORD_OVERLAP)
        );
        assert_eq!(score_team("liverpool", &united), None);
    }

    #[test]
    fn card_segment_detection() {
        assert_eq!(
            detect_card_segment("ufc fight night prelims"),
            Some(CardSegment::Prelims)
        );
        assert_eq!(
            detect_card_segment("ufc 300 main card"),
            Some(CardSegment::MainCard)
        );
        assert_eq!(detect_card_segment("ufc 300"), None);
    }

    #[test]
    fn time_distance_wraps_midnight() {
        let start = Utc::now()
            .date_naive()
            .and_hms_opt(23, 0, 0)
            .unwrap()
            .and_utc();
        let distance = time_distance(start, NaiveTime::from_hms_opt(1, 0, 0).unwrap(), chrono_tz::UTC);
        assert_eq!(distance, 120);
    }
}
