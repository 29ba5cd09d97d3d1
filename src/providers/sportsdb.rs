//! Narrow secondary adapter over TheSportsDB.
//!
//! Covers a fixed set of soccer competitions; useful as a fallback when the
//! primary backend drops future fixtures from its schedule endpoints. Team
//! stats are not available on this API.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::models::{Event, EventStatus, Sport, Team, TeamStats};
use crate::providers::http::{ProviderHttpClient, RateLimit};
use crate::providers::{ProviderStats, SportsProvider};
use crate::utils::datetime::parse_flexible;

const BASE_URL: &str = "https://www.thesportsdb.com/api/v1/json";
/// Public shared key; a paid key can be supplied through configuration.
const DEFAULT_API_KEY: &str = "3";

struct LeagueDef {
    slug: &'static str,
    /// TheSportsDB numeric league id
    id: u32,
    name: &'static str,
}

const LEAGUES: &[LeagueDef] = &[
    LeagueDef { slug: "eng.1", id: 4328, name: "English Premier League" },
    LeagueDef { slug: "eng.2", id: 4329, name: "English League Championship" },
    LeagueDef { slug: "esp.1", id: 4335, name: "Spanish La Liga" },
    LeagueDef { slug: "ger.1", id: 4331, name: "German Bundesliga" },
    LeagueDef { slug: "ita.1", id: 4332, name: "Italian Serie A" },
    LeagueDef { slug: "fra.1", id: 4334, name: "French Ligue 1" },
    LeagueDef { slug: "ned.1", id: 4337, name: "Dutch Eredivisie" },
    LeagueDef { slug: "por.1", id: 4344, name: "Portuguese Primeira Liga" },
];

fn league_def(slug: &str) -> Option<&'static LeagueDef> {
    LEAGUES.iter().find(|def| def.slug == slug)
}

pub struct SportsDbProvider {
    http: ProviderHttpClient,
    api_key: String,
}

impl SportsDbProvider {
    pub fn new(requests_per_minute: u32, api_key: Option<String>) -> Self {
        Self {
            http: ProviderHttpClient::new("sportsdb", RateLimit::per_minute(requests_per_minute)),
            api_key: api_key.unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{BASE_URL}/{}/{endpoint}", self.api_key)
    }
}

#[async_trait]
impl SportsProvider for SportsDbProvider {
    fn name(&self) -> &str {
        "sportsdb"
    }

    fn supports_league(&self, league: &str) -> bool {
        league_def(league).is_some()
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
        let def = league_def(league)
            .ok_or_else(|| ProviderError::UnsupportedLeague(league.to_string()))?;
        let url = self.url(&format!(
            "eventsday.php?d={}&l={}",
            date.format("%Y-%m-%d"),
            urlencoding::encode(def.name)
        ));
        let doc: Option<EventsDoc> = self.http.get_json(&url, cancel).await?;
        Ok(doc
            .and_then(|d| d.events)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| e.into_event(league))
            .collect())
    }

    async fn team_schedule(
        &self,
        team_id: &str,
        league: &str,
        days_ahead: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, ProviderError> {
        if league_def(league).is_none() {
            return Err(ProviderError::UnsupportedLeague(league.to_string()));
        }
        let url = self.url(&format!("eventsnext.php?id={team_id}"));
        let doc: Option<EventsDoc> = self.http.get_json(&url, cancel).await?;

        let horizon = Utc::now() + Duration::days(days_ahead);
        Ok(doc
            .and_then(|d| d.events)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| e.into_event(league))
            .filter(|e| e.start_time <= horizon)
            .collect())
    }

    async fn team(
        &self,
        team_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Team>, ProviderError> {
        if league_def(league).is_none() {
            return Err(ProviderError::UnsupportedLeague(league.to_string()));
        }
        let url = self.url(&format!("lookupteam.php?id={team_id}"));
        let doc: Option<TeamsDoc> = self.http.get_json(&url, cancel).await?;
        Ok(doc
            .and_then(|d| d.teams)
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|t| t.into_team(league)))
    }

    async fn event(
        &self,
        event_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Event>, ProviderError> {
        if league_def(league).is_none() {
            return Err(ProviderError::UnsupportedLeague(league.to_string()));
        }
        let url = self.url(&format!("lookupevent.php?id={event_id}"));
        let doc: Option<EventsDoc> = self.http.get_json(&url, cancel).await?;
        Ok(doc
            .and_then(|d| d.events)
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|e| e.into_event(league)))
    }

    async fn team_stats(
        &self,
        _team_id: &str,
        _league: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<TeamStats>, ProviderError> {
        // Not exposed by this API
        Ok(None)
    }

    async fn league_teams(
        &self,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Team>, ProviderError> {
        let def = league_def(league)
            .ok_or_else(|| ProviderError::UnsupportedLeague(league.to_string()))?;
        let url = self.url(&format!("lookup_all_teams.php?id={}", def.id));
        let doc: Option<TeamsDoc> = self.http.get_json(&url, cancel).await?;
        Ok(doc
            .and_then(|d| d.teams)
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.into_team(league))
            .collect())
    }

    fn stats(&self) -> ProviderStats {
        self.http.stats()
    }

    fn reset_stats(&self) {
        self.http.reset_stats();
    }
}

// ---------------------------------------------------------------------------
// Wire shapes. The API returns `null` instead of empty arrays.

#[derive(Debug, Deserialize)]
struct EventsDoc {
    events: Option<Vec<WireEvent>>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(rename = "idEvent")]
    id: String,
    #[serde(rename = "strEvent")]
    name: Option<String>,
    #[serde(rename = "strTimestamp")]
    timestamp: Option<String>,
    #[serde(rename = "dateEvent")]
    date: Option<String>,
    #[serde(rename = "strTime")]
    time: Option<String>,
    #[serde(rename = "strStatus")]
    status: Option<String>,
    #[serde(rename = "strVenue")]
    venue: Option<String>,
    #[serde(rename = "idHomeTeam")]
    home_team_id: Option<String>,
    #[serde(rename = "idAwayTeam")]
    away_team_id: Option<String>,
    #[serde(rename = "strHomeTeam")]
    home_team_name: Option<String>,
    #[serde(rename = "strAwayTeam")]
    away_team_name: Option<String>,
    #[serde(rename = "intHomeScore")]
    home_score: Option<String>,
    #[serde(rename = "intAwayScore")]
    away_score: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TeamsDoc {
    teams: Option<Vec<WireTeam>>,
}

#[derive(Debug, Deserialize)]
struct WireTeam {
    #[serde(rename = "idTeam")]
    id: String,
    #[serde(rename = "strTeam")]
    name: Option<String>,
    #[serde(rename = "strTeamShort")]
    short_name: Option<String>,
    #[serde(rename = "strBadge")]
    badge: Option<String>,
    #[serde(rename = "strLocation")]
    location: Option<String>,
}

fn parse_status(status: Option<&str>) -> EventStatus {
    match status.unwrap_or_default() {
        "Match Finished" | "FT" | "AET" | "PEN" => EventStatus::Final,
        "Postponed" => EventStatus::Postponed,
        "Cancelled" | "Canceled" => EventStatus::Canceled,
        "1H" | "2H" | "HT" | "ET" | "Live" => EventStatus::InProgress,
        _ => EventStatus::Scheduled,
    }
}

impl WireTeam {
    fn into_team(self, league: &str) -> Team {
        let name = self.name.unwrap_or_else(|| format!("Team {}", self.id));
        Team {
            provider: "sportsdb".to_string(),
            provider_team_id: self.id,
            short_name: self.short_name.unwrap_or_else(|| name.clone()),
            abbreviation: String::new(),
            location: self.location.unwrap_or_default(),
            logo_url: self.badge,
            sport: Sport::Soccer,
            league: league.to_string(),
            name,
        }
    }
}

impl WireEvent {
    fn into_event(self, league: &str) -> Option<Event> {
        let start_time = self
            .timestamp
            .as_deref()
            .and_then(parse_flexible)
            .or_else(|| {
                let date = self.date.as_deref()?;
                let time = self.time.as_deref().unwrap_or("00:00:00");
                parse_flexible(&format!("{date} {time}"))
            })?;

        let simple_team = |id: &Option<String>, name: &Option<String>| -> Team {
            let name = name.clone().unwrap_or_default();
            Team {
                provider: "sportsdb".to_string(),
                provider_team_id: id
                    .clone()
                    .unwrap_or_else(|| format!("name:{}", name.to_lowercase())),
                short_name: name.clone(),
                abbreviation: String::new(),
                location: String::new(),
                logo_url: None,
                sport: Sport::Soccer,
                league: league.to_string(),
                name,
            }
        };

        Some(Event {
            provider: "sportsdb".to_string(),
            provider_event_id: self.id,
            league: league.to_string(),
            sport: Sport::Soccer,
            start_time,
            status: parse_status(self.status.as_deref()),
            home_team: simple_team(&self.home_team_id, &self.home_team_name),
            away_team: simple_team(&self.away_team_id, &self.away_team_name),
            short_name: self.name,
            venue: self.venue,
            home_score: self.home_score.and_then(|s| s.parse().ok()),
            away_score: self.away_score.and_then(|s| s.parse().ok()),
            broadcasts: Vec::new(),
            odds: None,
            home_record: None,
            away_record: None,
            home_rank: None,
            away_rank: None,
            season_type: None,
            conference_game: None,
            main_card_start: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_day_maps_to_canonical_events() {
        let fixture = r#"{
            "events": [{
                "idEvent": "2070312",
                "strEvent": "Tottenham vs Arsenal",
                "strTimestamp": "2025-11-23T16:30:00",
                "dateEvent": "2025-11-23",
                "strTime": "16:30:00",
                "strStatus": "Not Started",
                "strVenue": "Tottenham Hotspur Stadium",
                "idHomeTeam": "133616",
                "idAwayTeam": "133604",
                "strHomeTeam": "Tottenham Hotspur",
                "strAwayTeam": "Arsenal",
                "intHomeScore": null,
                "intAwayScore": null
            }]
        }"#;
        let doc: EventsDoc = serde_json::from_str(fixture).unwrap();
        let event = doc
            .events
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
            .into_event("eng.1")
            .unwrap();

        assert_eq!(event.provider, "sportsdb");
        assert_eq!(event.sport, Sport::Soccer);
        assert_eq!(event.status, EventStatus::Scheduled);
        assert_eq!(event.home_team.name, "Tottenham Hotspur");
        assert_eq!(event.away_team.provider_team_id, "133604");
        assert_eq!(event.home_score, None);
    }

    #[test]
    fn null_event_list_is_empty() {
        let doc: EventsDoc = serde_json::from_str(r#"{"events": null}"#).unwrap();
        assert!(doc.events.is_none());
    }

    #[test]
    fn status_strings_map() {
        assert_eq!(parse_status(Some("Match Finished")), EventStatus::Final);
        assert_eq!(parse_status(Some("Not Started")), EventStatus::Scheduled);
        assert_eq!(parse_status(Some("2H")), EventStatus::InProgress);
        assert_eq!(parse_status(Some("Postponed")), EventStatus::Postponed);
        assert_eq!(parse_status(None), EventStatus::Scheduled);
    }

    #[test]
    fn only_configured_soccer_slugs_supported() {
        let provider = SportsDbProvider::new(20, None);
        assert!(provider.supports_league("eng.1"));
        assert!(!provider.supports_league("nfl"));
        assert!(!provider.supports_league("bra.1"));
    }
}
