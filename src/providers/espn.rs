//! Broad-coverage adapter over the ESPN site API.
//!
//! Wire shapes are internal to this module; everything leaves as canonical
//! entities. League slugs follow ESPN's own conventions (`nfl`, `eng.1`,
//! `uefa.champions`), so dotted slugs not in the static table are routed as
//! soccer competitions.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::models::{
    Broadcast, Event, EventStatus, Odds, SeasonType, Sport, Streak, StreakKind, Team, TeamStats,
};
use crate::providers::http::{ProviderHttpClient, RateLimit};
use crate::providers::{ProviderStats, SportsProvider};
use crate::utils::datetime::parse_flexible;

const BASE_URL: &str = "https://site.api.espn.com/apis/site/v2/sports";

struct LeagueDef {
    slug: &'static str,
    sport: Sport,
    path: &'static str,
}

/// Static slug table. Dotted slugs outside this table resolve as soccer.
const LEAGUES: &[LeagueDef] = &[
    LeagueDef { slug: "nfl", sport: Sport::Football, path: "football/nfl" },
    LeagueDef { slug: "ncaaf", sport: Sport::Football, path: "football/college-football" },
    LeagueDef { slug: "nba", sport: Sport::Basketball, path: "basketball/nba" },
    LeagueDef { slug: "wnba", sport: Sport::Basketball, path: "basketball/wnba" },
    LeagueDef { slug: "ncaab", sport: Sport::Basketball, path: "basketball/mens-college-basketball" },
    LeagueDef { slug: "nhl", sport: Sport::Hockey, path: "hockey/nhl" },
    LeagueDef { slug: "mlb", sport: Sport::Baseball, path: "baseball/mlb" },
    LeagueDef { slug: "usa.1", sport: Sport::Soccer, path: "soccer/usa.1" },
    LeagueDef { slug: "eng.1", sport: Sport::Soccer, path: "soccer/eng.1" },
    LeagueDef { slug: "eng.2", sport: Sport::Soccer, path: "soccer/eng.2" },
    LeagueDef { slug: "eng.fa", sport: Sport::Soccer, path: "soccer/eng.fa" },
    LeagueDef { slug: "esp.1", sport: Sport::Soccer, path: "soccer/esp.1" },
    LeagueDef { slug: "ger.1", sport: Sport::Soccer, path: "soccer/ger.1" },
    LeagueDef { slug: "ita.1", sport: Sport::Soccer, path: "soccer/ita.1" },
    LeagueDef { slug: "fra.1", sport: Sport::Soccer, path: "soccer/fra.1" },
    LeagueDef { slug: "ned.1", sport: Sport::Soccer, path: "soccer/ned.1" },
    LeagueDef { slug: "por.1", sport: Sport::Soccer, path: "soccer/por.1" },
    LeagueDef { slug: "mex.1", sport: Sport::Soccer, path: "soccer/mex.1" },
    LeagueDef { slug: "uefa.champions", sport: Sport::Soccer, path: "soccer/uefa.champions" },
    LeagueDef { slug: "uefa.europa", sport: Sport::Soccer, path: "soccer/uefa.europa" },
    LeagueDef { slug: "ufc", sport: Sport::Mma, path: "mma/ufc" },
    LeagueDef { slug: "pga", sport: Sport::Golf, path: "golf/pga" },
    LeagueDef { slug: "f1", sport: Sport::Racing, path: "racing/f1" },
    LeagueDef { slug: "atp", sport: Sport::Tennis, path: "tennis/atp" },
    LeagueDef { slug: "wta", sport: Sport::Tennis, path: "tennis/wta" },
];

fn league_lookup(slug: &str) -> Option<(Sport, String)> {
    if let Some(def) = LEAGUES.iter().find(|def| def.slug == slug) {
        return Some((def.sport, def.path.to_string()));
    }
    // ESPN soccer slugs are country/competition pairs: eng.1, bra.1, ...
    if slug.contains('.') {
        return Some((Sport::Soccer, format!("soccer/{slug}")));
    }
    None
}

pub struct EspnProvider {
    http: ProviderHttpClient,
}

impl EspnProvider {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            http: ProviderHttpClient::new("espn", RateLimit::per_minute(requests_per_minute)),
        }
    }

    fn path(&self, league: &str) -> Result<(Sport, String), ProviderError> {
        league_lookup(league)
            .ok_or_else(|| ProviderError::UnsupportedLeague(league.to_string()))
    }
}

#[async_trait]
impl SportsProvider for EspnProvider {
    fn name(&self) -> &str {
        "espn"
    }

    fn supports_league(&self, league: &str) -> bool {
        league_lookup(league).is_some()
    }

    fn supported_leagues(&self) -> Vec<String> {
        LEAGUES.iter().map(|def| def.slug.to_string()).collect()
    }

    async fn events_on(
        &self,
        league: &str,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, ProviderError> {
        let (sport, path) = self.path(league)?;
        let url = format!(
            "{BASE_URL}/{path}/scoreboard?dates={}",
            date.format("%Y%m%d")
        );
        let doc: Option<ScoreboardDoc> = self.http.get_json(&url, cancel).await?;
        Ok(doc
            .map(|d| d.events)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| e.into_event(sport, league))
            .collect())
    }

    async fn team_schedule(
        &self,
        team_id: &str,
        league: &str,
        days_ahead: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, ProviderError> {
        let (sport, path) = self.path(league)?;
        let url = format!("{BASE_URL}/{path}/teams/{team_id}/schedule");
        let doc: Option<ScheduleDoc> = self.http.get_json(&url, cancel).await?;

        let horizon = Utc::now() + Duration::days(days_ahead);
        Ok(doc
            .map(|d| d.events)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| e.into_event(sport, league))
            .filter(|e| e.start_time <= horizon)
            .collect())
    }

    async fn team(
        &self,
        team_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Team>, ProviderError> {
        let (sport, path) = self.path(league)?;
        let url = format!("{BASE_URL}/{path}/teams/{team_id}");
        let doc: Option<TeamDoc> = self.http.get_json(&url, cancel).await?;
        Ok(doc.map(|d| d.team.base.into_team(sport, league)))
    }

    async fn event(
        &self,
        event_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Event>, ProviderError> {
        let (sport, path) = self.path(league)?;
        let url = format!("{BASE_URL}/{path}/summary?event={event_id}");
        let doc: Option<SummaryDoc> = self.http.get_json(&url, cancel).await?;

        let Some(doc) = doc else {
            return Ok(None);
        };
        let Some(header) = doc.header else {
            return Ok(None);
        };

        let wire = WireEvent {
            id: header.id,
            date: None,
            name: None,
            short_name: None,
            season: header.season,
            competitions: header.competitions,
            status: None,
        };
        let mut event = wire.into_event(sport, league);
        if let (Some(event), Some(odds)) = (event.as_mut(), doc.pickcenter.first()) {
            if event.odds.is_none() {
                event.odds = Some(odds.to_odds());
            }
        }
        Ok(event)
    }

    async fn team_stats(
        &self,
        team_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TeamStats>, ProviderError> {
        let (_, path) = self.path(league)?;
        let url = format!("{BASE_URL}/{path}/teams/{team_id}");
        let doc: Option<TeamDoc> = self.http.get_json(&url, cancel).await?;
        Ok(doc.map(|d| d.team.into_stats()))
    }

    async fn league_teams(
        &self,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Team>, ProviderError> {
        let (sport, path) = self.path(league)?;
        let url = format!("{BASE_URL}/{path}/teams?limit=400");
        let doc: Option<TeamsDoc> = self.http.get_json(&url, cancel).await?;

        let mut teams = Vec::new();
        for sport_node in doc.map(|d| d.sports).unwrap_or_default() {
            for league_node in sport_node.leagues {
                for wrapper in league_node.teams {
                    teams.push(wrapper.team.into_team(sport, league));
                }
            }
        }
        Ok(teams)
    }

    fn stats(&self) -> ProviderStats {
        self.http.stats()
    }

    fn reset_stats(&self) {
        self.http.reset_stats();
    }
}

// ---------------------------------------------------------------------------
// Wire shapes

#[derive(Debug, Deserialize)]
struct ScoreboardDoc {
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
struct ScheduleDoc {
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
struct SummaryDoc {
    header: Option<WireEventHeader>,
    #[serde(default)]
    pickcenter: Vec<WireOdds>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEventHeader {
    id: String,
    season: Option<WireSeason>,
    #[serde(default)]
    competitions: Vec<WireCompetition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    id: String,
    date: Option<String>,
    name: Option<String>,
    short_name: Option<String>,
    season: Option<WireSeason>,
    #[serde(default)]
    competitions: Vec<WireCompetition>,
    status: Option<WireStatus>,
}

#[derive(Debug, Deserialize)]
struct WireSeason {
    #[serde(rename = "type")]
    kind: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCompetition {
    date: Option<String>,
    venue: Option<WireVenue>,
    conference_competition: Option<bool>,
    #[serde(default)]
    competitors: Vec<WireCompetitor>,
    #[serde(default)]
    broadcasts: Vec<WireBroadcast>,
    #[serde(default)]
    odds: Vec<WireOdds>,
    status: Option<WireStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVenue {
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCompetitor {
    home_away: Option<String>,
    score: Option<String>,
    curated_rank: Option<WireRank>,
    #[serde(default)]
    records: Vec<WireRecord>,
    team: Option<WireTeam>,
    athlete: Option<WireAthlete>,
}

#[derive(Debug, Deserialize)]
struct WireRank {
    current: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(rename = "type")]
    kind: Option<String>,
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAthlete {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTeam {
    id: String,
    display_name: Option<String>,
    short_display_name: Option<String>,
    abbreviation: Option<String>,
    location: Option<String>,
    name: Option<String>,
    logo: Option<String>,
    #[serde(default)]
    logos: Vec<WireLogo>,
}

#[derive(Debug, Deserialize)]
struct WireLogo {
    href: String,
}

#[derive(Debug, Deserialize)]
struct WireBroadcast {
    #[serde(default)]
    names: Vec<String>,
    market: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOdds {
    details: Option<String>,
    over_under: Option<f64>,
    spread: Option<f64>,
    home_team_odds: Option<WireTeamOdds>,
    away_team_odds: Option<WireTeamOdds>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTeamOdds {
    money_line: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    #[serde(rename = "type")]
    kind: Option<WireStatusType>,
}

#[derive(Debug, Deserialize)]
struct WireStatusType {
    name: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TeamsDoc {
    #[serde(default)]
    sports: Vec<WireSportNode>,
}

#[derive(Debug, Deserialize)]
struct WireSportNode {
    #[serde(default)]
    leagues: Vec<WireLeagueNode>,
}

#[derive(Debug, Deserialize)]
struct WireLeagueNode {
    #[serde(default)]
    teams: Vec<WireTeamWrapper>,
}

#[derive(Debug, Deserialize)]
struct WireTeamWrapper {
    team: WireTeam,
}

#[derive(Debug, Deserialize)]
struct TeamDoc {
    team: WireTeamDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTeamDetail {
    #[serde(flatten)]
    base: WireTeam,
    record: Option<WireRecordSet>,
    rank: Option<u32>,
    standing_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRecordSet {
    #[serde(default)]
    items: Vec<WireRecordItem>,
}

#[derive(Debug, Deserialize)]
struct WireRecordItem {
    #[serde(rename = "type")]
    kind: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    stats: Vec<WireStat>,
}

#[derive(Debug, Deserialize)]
struct WireStat {
    name: String,
    value: f64,
}

// ---------------------------------------------------------------------------
// Wire → canonical mapping

fn parse_status(status: Option<&WireStatus>) -> EventStatus {
    let Some(kind) = status.and_then(|s| s.kind.as_ref()) else {
        return EventStatus::Scheduled;
    };
    let name = kind.name.as_deref().unwrap_or_default();
    match kind.state.as_deref() {
        Some("pre") => EventStatus::Scheduled,
        Some("in") => EventStatus::InProgress,
        _ => {
            if name.contains("POSTPONED") {
                EventStatus::Postponed
            } else if name.contains("CANCELED") || name.contains("CANCELLED") {
                EventStatus::Canceled
            } else {
                EventStatus::Final
            }
        }
    }
}

fn parse_season(season: Option<&WireSeason>) -> Option<SeasonType> {
    match season.and_then(|s| s.kind)? {
        1 => Some(SeasonType::Preseason),
        2 => Some(SeasonType::RegularSeason),
        3 => Some(SeasonType::Postseason),
        _ => None,
    }
}

impl WireTeam {
    fn into_team(self, sport: Sport, league: &str) -> Team {
        let name = self
            .display_name
            .or(self.name.clone())
            .unwrap_or_else(|| format!("Team {}", self.id));
        let logo_url = self.logo.or_else(|| self.logos.first().map(|l| l.href.clone()));
        Team {
            provider: "espn".to_string(),
            provider_team_id: self.id,
            short_name: self.short_display_name.unwrap_or_else(|| name.clone()),
            abbreviation: self.abbreviation.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            name,
            logo_url,
            sport,
            league: league.to_string(),
        }
    }
}

/// Placeholder participant for tournament cards where ESPN lists athletes
/// rather than teams.
fn participant_team(name: &str, sport: Sport, league: &str) -> Team {
    Team {
        provider: "espn".to_string(),
        provider_team_id: format!("name:{}", name.to_lowercase()),
        name: name.to_string(),
        short_name: name.to_string(),
        abbreviation: String::new(),
        location: String::new(),
        logo_url: None,
        sport,
        league: league.to_string(),
    }
}

impl WireOdds {
    fn to_odds(&self) -> Odds {
        Odds {
            spread: self.spread,
            over_under: self.over_under,
            home_moneyline: self.home_team_odds.as_ref().and_then(|o| o.money_line),
            away_moneyline: self.away_team_odds.as_ref().and_then(|o| o.money_line),
            details: self.details.clone(),
        }
    }
}

impl WireEvent {
    fn into_event(self, sport: Sport, league: &str) -> Option<Event> {
        let competition = self.competitions.into_iter().next();
        let date_str = self
            .date
            .clone()
            .or_else(|| competition.as_ref().and_then(|c| c.date.clone()))?;
        let start_time = parse_flexible(&date_str)?;
        let status = parse_status(
            self.status
                .as_ref()
                .or(competition.as_ref().and_then(|c| c.status.as_ref())),
        );

        let mut home = None;
        let mut away = None;
        if let Some(competition) = &competition {
            for competitor in &competition.competitors {
                let slot = match competitor.home_away.as_deref() {
                    Some("home") => &mut home,
                    Some("away") => &mut away,
                    _ => {
                        if home.is_none() {
                            &mut home
                        } else {
                            &mut away
                        }
                    }
                };
                if slot.is_none() {
                    *slot = Some(competitor);
                }
            }
        }

        let competitor_team = |competitor: Option<&&WireCompetitor>, fallback: &str| -> Team {
            match competitor {
                Some(c) => {
                    if let Some(team) = &c.team {
                        WireTeam {
                            id: team.id.clone(),
                            display_name: team.display_name.clone(),
                            short_display_name: team.short_display_name.clone(),
                            abbreviation: team.abbreviation.clone(),
                            location: team.location.clone(),
                            name: team.name.clone(),
                            logo: team.logo.clone(),
                            logos: Vec::new(),
                        }
                        .into_team(sport, league)
                    } else if let Some(name) =
                        c.athlete.as_ref().and_then(|a| a.display_name.clone())
                    {
                        participant_team(&name, sport, league)
                    } else {
                        participant_team(fallback, sport, league)
                    }
                }
                None => participant_team(fallback, sport, league),
            }
        };

        // Tournament cards name the fixture, not two teams; split the short
        // name so the main-participants pair is still populated
        let (fallback_home, fallback_away) = split_matchup_name(
            self.short_name.as_deref().or(self.name.as_deref()).unwrap_or(""),
        );

        let home_team = competitor_team(home.as_ref(), &fallback_home);
        let away_team = competitor_team(away.as_ref(), &fallback_away);

        let score_of = |competitor: Option<&&WireCompetitor>| {
            competitor
                .and_then(|c| c.score.as_deref())
                .and_then(|s| s.parse::<i32>().ok())
        };
        let rank_of = |competitor: Option<&&WireCompetitor>| {
            competitor
                .and_then(|c| c.curated_rank.as_ref())
                .and_then(|r| r.current)
                .filter(|r| (1..=25).contains(r))
        };
        let record_of = |competitor: Option<&&WireCompetitor>| {
            competitor.and_then(|c| {
                c.records
                    .iter()
                    .find(|r| r.kind.as_deref() == Some("total"))
                    .or_else(|| c.records.first())
                    .and_then(|r| r.summary.clone())
            })
        };

        let broadcasts = competition
            .as_ref()
            .map(|c| {
                c.broadcasts
                    .iter()
                    .flat_map(|b| {
                        let national = b.market.as_deref() == Some("national");
                        b.names.iter().map(move |name| Broadcast {
                            name: name.clone(),
                            is_national: national,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let odds = competition
            .as_ref()
            .and_then(|c| c.odds.first())
            .map(|o| o.to_odds());

        Some(Event {
            provider: "espn".to_string(),
            provider_event_id: self.id,
            league: league.to_string(),
            sport,
            start_time,
            status,
            home_score: score_of(home.as_ref()),
            away_score: score_of(away.as_ref()),
            home_rank: rank_of(home.as_ref()),
            away_rank: rank_of(away.as_ref()),
            home_record: record_of(home.as_ref()),
            away_record: record_of(away.as_ref()),
            home_team,
            away_team,
            short_name: self.short_name,
            venue: competition
                .as_ref()
                .and_then(|c| c.venue.as_ref())
                .and_then(|v| v.full_name.clone()),
            broadcasts,
            odds,
            season_type: parse_season(self.season.as_ref()),
            conference_game: competition.as_ref().and_then(|c| c.conference_competition),
            main_card_start: None,
        })
    }
}

fn split_matchup_name(name: &str) -> (String, String) {
    for separator in [" vs. ", " vs ", " v ", " @ ", " at "] {
        if let Some((left, right)) = name.split_once(separator) {
            // ESPN short names read "AWAY @ HOME" / "A vs B"
            return (right.trim().to_string(), left.trim().to_string());
        }
    }
    (name.trim().to_string(), String::new())
}

impl WireTeamDetail {
    fn into_stats(self) -> TeamStats {
        let mut record = String::new();
        let mut home_record = None;
        let mut away_record = None;
        let mut streak = None;

        for item in self.record.map(|r| r.items).unwrap_or_default() {
            match item.kind.as_deref() {
                Some("total") | None => {
                    if let Some(summary) = item.summary {
                        record = summary;
                    }
                    if let Some(stat) = item.stats.iter().find(|s| s.name == "streak") {
                        let length = stat.value.abs() as u32;
                        if length > 0 {
                            streak = Some(Streak {
                                kind: if stat.value >= 0.0 {
                                    StreakKind::Won
                                } else {
                                    StreakKind::Lost
                                },
                                length,
                            });
                        }
                    }
                }
                Some("home") => home_record = item.summary,
                Some("road") | Some("away") => away_record = item.summary,
                _ => {}
            }
        }

        // "3rd in AFC East" → division "AFC East"
        let division = self
            .standing_summary
            .as_deref()
            .and_then(|s| s.split_once(" in "))
            .map(|(_, division)| division.to_string());

        TeamStats {
            record,
            streak,
            home_record,
            away_record,
            conference: None,
            division,
            rank: self.rank.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOREBOARD_FIXTURE: &str = r#"{
        "events": [{
            "id": "401772821",
            "date": "2025-12-02T01:15Z",
            "name": "New York Giants at New England Patriots",
            "shortName": "NYG @ NE",
            "season": {"type": 2},
            "status": {"type": {"name": "STATUS_SCHEDULED", "state": "pre"}},
            "competitions": [{
                "venue": {"fullName": "Gillette Stadium"},
                "conferenceCompetition": false,
                "broadcasts": [{"market": "national", "names": ["ESPN"]}],
                "odds": [{"details": "NE -6.5", "overUnder": 42.5, "spread": -6.5,
                          "homeTeamOdds": {"moneyLine": -280},
                          "awayTeamOdds": {"moneyLine": 230}}],
                "competitors": [
                    {"homeAway": "home", "score": "0",
                     "records": [{"type": "total", "summary": "10-2"}],
                     "curatedRank": {"current": 3},
                     "team": {"id": "17", "displayName": "New England Patriots",
                              "shortDisplayName": "Patriots", "abbreviation": "NE",
                              "location": "New England", "name": "Patriots"}},
                    {"homeAway": "away", "score": "0",
                     "records": [{"type": "total", "summary": "7-5"}],
                     "team": {"id": "19", "displayName": "New York Giants",
                              "shortDisplayName": "Giants", "abbreviation": "NYG",
                              "location": "New York", "name": "Giants"}}
                ]
            }]
        }]
    }"#;

    #[test]
    fn scoreboard_maps_to_canonical_event() {
        let doc: ScoreboardDoc = serde_json::from_str(SCOREBOARD_FIXTURE).unwrap();
        let event = doc
            .events
            .into_iter()
            .next()
            .unwrap()
            .into_event(Sport::Football, "nfl")
            .unwrap();

        assert_eq!(event.provider_event_id, "401772821");
        assert_eq!(event.status, EventStatus::Scheduled);
        assert_eq!(event.home_team.provider_team_id, "17");
        assert_eq!(event.away_team.provider_team_id, "19");
        assert_eq!(event.home_team.short_name, "Patriots");
        assert_eq!(event.venue.as_deref(), Some("Gillette Stadium"));
        assert_eq!(event.home_record.as_deref(), Some("10-2"));
        assert_eq!(event.home_rank, Some(3));
        assert_eq!(event.away_rank, None);
        assert_eq!(event.season_type, Some(SeasonType::RegularSeason));
        assert!(event.broadcasts[0].is_national);

        let odds = event.odds.unwrap();
        assert_eq!(odds.spread, Some(-6.5));
        assert_eq!(odds.over_under, Some(42.5));
        assert_eq!(odds.home_moneyline, Some(-280));

        let expected = parse_flexible("2025-12-02T01:15Z").unwrap();
        assert_eq!(event.start_time, expected);
    }

    #[test]
    fn status_state_mapping() {
        let status = |state: &str, name: &str| {
            parse_status(Some(&WireStatus {
                kind: Some(WireStatusType {
                    name: Some(name.to_string()),
                    state: Some(state.to_string()),
                }),
            }))
        };
        assert_eq!(status("pre", "STATUS_SCHEDULED"), EventStatus::Scheduled);
        assert_eq!(status("in", "STATUS_IN_PROGRESS"), EventStatus::InProgress);
        assert_eq!(status("post", "STATUS_FINAL"), EventStatus::Final);
        assert_eq!(status("post", "STATUS_POSTPONED"), EventStatus::Postponed);
        assert_eq!(status("post", "STATUS_CANCELED"), EventStatus::Canceled);
    }

    #[test]
    fn tournament_card_synthesizes_participants() {
        let fixture = r#"{
            "events": [{
                "id": "600051665",
                "date": "2025-11-22T03:00Z",
                "name": "UFC Fight Night: Smith vs Jones",
                "shortName": "Smith vs Jones",
                "competitions": [{"competitors": []}]
            }]
        }"#;
        let doc: ScoreboardDoc = serde_json::from_str(fixture).unwrap();
        let event = doc
            .events
            .into_iter()
            .next()
            .unwrap()
            .into_event(Sport::Mma, "ufc")
            .unwrap();

        assert_eq!(event.home_team.name, "Jones");
        assert_eq!(event.away_team.name, "Smith");
        assert!(event.home_team.provider_team_id.starts_with("name:"));
    }

    #[test]
    fn team_detail_maps_to_stats() {
        let fixture = r#"{
            "team": {
                "id": "8",
                "displayName": "Detroit Pistons",
                "standingSummary": "1st in Central Division",
                "record": {"items": [
                    {"type": "total", "summary": "18-4",
                     "stats": [{"name": "streak", "value": 6.0}]},
                    {"type": "home", "summary": "11-1"},
                    {"type": "road", "summary": "7-3"}
                ]}
            }
        }"#;
        let doc: TeamDoc = serde_json::from_str(fixture).unwrap();
        let stats = doc.team.into_stats();

        assert_eq!(stats.record, "18-4");
        assert_eq!(stats.home_record.as_deref(), Some("11-1"));
        assert_eq!(stats.away_record.as_deref(), Some("7-3"));
        let streak = stats.streak.unwrap();
        assert_eq!(streak.kind, StreakKind::Won);
        assert_eq!(streak.length, 6);
        assert_eq!(stats.division.as_deref(), Some("Central Division"));
    }

    #[test]
    fn dotted_slugs_route_as_soccer() {
        assert!(league_lookup("bra.1").is_some());
        assert_eq!(league_lookup("bra.1").unwrap().0, Sport::Soccer);
        assert!(league_lookup("liiga").is_none());
        assert_eq!(league_lookup("nfl").unwrap().0, Sport::Football);
    }
}
