//! Shared test doubles and fixtures, used by unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use crate::errors::{ManagerError, ProviderError};
use crate::manager::{ChannelSpec, ManagerApi, ManagerChannel, ManagerStream};
use crate::models::{Event, EventStatus, Sport, Team, TeamStats};
use crate::providers::{ProviderStats, SportsProvider};

/// Scriptable in-memory provider: serves whatever events/teams/stats were
/// loaded into it and counts calls.
pub struct ScriptedProvider {
    pub name: String,
    pub leagues: Vec<String>,
    pub events: Vec<Event>,
    pub teams: Vec<Team>,
    pub stats: HashMap<String, TeamStats>,
    pub calls: AtomicU64,
}

impl ScriptedProvider {
    pub fn new(name: &str, leagues: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            leagues: leagues.iter().map(|s| s.to_string()).collect(),
            events: Vec::new(),
            teams: Vec::new(),
            stats: HashMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    pub fn with_teams(mut self, teams: Vec<Team>) -> Self {
        self.teams = teams;
        self
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl SportsProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_league(&self, league: &str) -> bool {
        self.leagues.iter().any(|l| l == league)
    }

    fn supported_leagues(&self) -> Vec<String> {
        self.leagues.clone()
    }

    async fn events_on(
        &self,
        league: &str,
        date: NaiveDate,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Event>, ProviderError> {
        self.count();
        Ok(self
            .events
            .iter()
            .filter(|e| e.league == league && e.start_time.date_naive() == date)
            .cloned()
            .collect())
    }

    async fn team_schedule(
        &self,
        team_id: &str,
        league: &str,
        _days_ahead: i64,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Event>, ProviderError> {
        self.count();
        Ok(self
            .events
            .iter()
            .filter(|e| e.league == league && e.involves(team_id))
            .cloned()
            .collect())
    }

    async fn team(
        &self,
        team_id: &str,
        league: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<Team>, ProviderError> {
        self.count();
        Ok(self
            .teams
            .iter()
            .find(|t| t.provider_team_id == team_id && t.league == league)
            .cloned())
    }

    async fn event(
        &self,
        event_id: &str,
        league: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<Event>, ProviderError> {
        self.count();
        Ok(self
            .events
            .iter()
            .find(|e| e.provider_event_id == event_id && e.league == league)
            .cloned())
    }

    async fn team_stats(
        &self,
        team_id: &str,
        _league: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<TeamStats>, ProviderError> {
        self.count();
        Ok(self.stats.get(team_id).cloned())
    }

    async fn league_teams(
        &self,
        league: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Team>, ProviderError> {
        self.count();
        Ok(self
            .teams
            .iter()
            .filter(|t| t.league == league)
            .cloned()
            .collect())
    }

    fn stats(&self) -> ProviderStats {
        ProviderStats {
            provider: self.name.clone(),
            requests: self.calls.load(Ordering::Relaxed),
            ..Default::default()
        }
    }

    fn reset_stats(&self) {
        self.calls.store(0, Ordering::Relaxed);
    }
}

/// In-memory IPTV manager double; records every call.
#[derive(Default)]
pub struct FakeManager {
    pub channels: Mutex<Vec<ManagerChannel>>,
    pub streams: Mutex<HashMap<String, Vec<ManagerStream>>>,
    pub next_id: Mutex<i64>,
    pub deleted: Mutex<Vec<i64>>,
    pub epg_bindings: Mutex<Vec<(i64, String)>>,
}

impl FakeManager {
    pub fn with_streams(group: &str, streams: Vec<(&str, &str)>) -> Self {
        let manager = Self::default();
        manager.streams.lock().unwrap().insert(
            group.to_string(),
            streams
                .into_iter()
                .map(|(id, name)| ManagerStream {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        );
        manager
    }
}

#[async_trait]
impl ManagerApi for FakeManager {
    async fn list_m3u_groups(&self) -> Result<Vec<String>, ManagerError> {
        Ok(self.streams.lock().unwrap().keys().cloned().collect())
    }

    async fn list_streams(&self, group: &str) -> Result<Vec<ManagerStream>, ManagerError> {
        Ok(self
            .streams
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_channels(&self) -> Result<Vec<ManagerChannel>, ManagerError> {
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<ManagerChannel, ManagerError> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let channel = ManagerChannel {
            id: *next,
            name: spec.name.clone(),
            number: spec.number,
            group: spec.group.clone(),
            epg_channel_id: None,
        };
        self.channels.lock().unwrap().push(channel.clone());
        Ok(channel)
    }

    async fn update_channel(&self, id: i64, spec: &ChannelSpec) -> Result<(), ManagerError> {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ManagerError::unexpected("unknown channel"))?;
        channel.name = spec.name.clone();
        channel.number = spec.number;
        channel.group = spec.group.clone();
        Ok(())
    }

    async fn delete_channel(&self, id: i64) -> Result<(), ManagerError> {
        self.channels.lock().unwrap().retain(|c| c.id != id);
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }

    async fn set_channel_epg(&self, id: i64, epg_channel_id: &str) -> Result<(), ManagerError> {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.iter_mut().find(|c| c.id == id) {
            channel.epg_channel_id = Some(epg_channel_id.to_string());
        }
        self.epg_bindings
            .lock()
            .unwrap()
            .push((id, epg_channel_id.to_string()));
        Ok(())
    }

    async fn refresh_m3u(&self, _account: &str) -> Result<(), ManagerError> {
        Ok(())
    }
}

/// Team fixture with identity fields derived from the display name.
pub fn team_fixture(
    provider: &str,
    id: &str,
    league: &str,
    sport: Sport,
    name: &str,
    short: &str,
    abbr: &str,
    location: &str,
) -> Team {
    Team {
        provider: provider.to_string(),
        provider_team_id: id.to_string(),
        name: name.to_string(),
        short_name: short.to_string(),
        abbreviation: abbr.to_string(),
        location: location.to_string(),
        logo_url: None,
        sport,
        league: league.to_string(),
    }
}

/// Minimal scheduled event between two teams.
pub fn event_fixture(
    id: &str,
    league: &str,
    sport: Sport,
    start: DateTime<Utc>,
    home: Team,
    away: Team,
) -> Event {
    Event {
        provider: home.provider.clone(),
        provider_event_id: id.to_string(),
        league: league.to_string(),
        sport,
        start_time: start,
        status: EventStatus::Scheduled,
        home_team: home,
        away_team: away,
        short_name: None,
        venue: None,
        home_score: None,
        away_score: None,
        broadcasts: Vec::new(),
        odds: None,
        home_record: None,
        away_record: None,
        home_rank: None,
        away_rank: None,
        season_type: None,
        conference_game: None,
        main_card_start: None,
    }
}

/// The Giants/Patriots fixture used throughout the matcher tests.
pub fn nfl_event(id: &str, start: DateTime<Utc>) -> Event {
    let home = team_fixture(
        "espn",
        "17",
        "nfl",
        Sport::Football,
        "New England Patriots",
        "Patriots",
        "NE",
        "New England",
    );
    let away = team_fixture(
        "espn",
        "19",
        "nfl",
        Sport::Football,
        "New York Giants",
        "Giants",
        "NYG",
        "New York",
    );
    event_fixture(id, "nfl", Sport::Football, start, home, away)
}
