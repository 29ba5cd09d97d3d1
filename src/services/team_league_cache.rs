//! Team/league reverse index: which leagues a team plays in, and which
//! leagues could plausibly host a pair of team names.
//!
//! The index is immutable once built. Refresh builds a shadow index from all
//! enabled adapters and swaps it in atomically; readers keep whatever
//! snapshot they already hold and are never blocked.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::database::Database;
use crate::errors::AppError;
use crate::matcher::normalize::significant_tokens;
use crate::models::{Sport, Team};
use crate::providers::ProviderRegistry;

/// Pseudo-selector expanding to every indexed soccer league.
pub const SOCCER_ALL: &str = "soccer_all";

/// One immutable build of the reverse index.
pub struct TeamLeagueIndex {
    pub built_at: DateTime<Utc>,
    by_league: HashMap<String, Vec<Arc<Team>>>,
    league_provider: HashMap<String, String>,
    /// normalized token → leagues containing a team with that token
    token_leagues: HashMap<String, BTreeSet<String>>,
    /// "provider:team_id" → leagues
    team_leagues: HashMap<String, BTreeSet<String>>,
    soccer_leagues: BTreeSet<String>,
}

impl TeamLeagueIndex {
    pub fn empty() -> Self {
        Self::build(Vec::new(), HashMap::new())
    }

    pub fn build(teams: Vec<Team>, league_provider: HashMap<String, String>) -> Self {
        let mut by_league: HashMap<String, Vec<Arc<Team>>> = HashMap::new();
        let mut token_leagues: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut team_leagues: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut soccer_leagues = BTreeSet::new();

        for team in teams {
            let team = Arc::new(team);
            if team.sport == Sport::Soccer {
                soccer_leagues.insert(team.league.clone());
            }

            team_leagues
                .entry(format!("{}:{}", team.provider, team.provider_team_id))
                .or_default()
                .insert(team.league.clone());

            for field in [&team.name, &team.short_name, &team.location] {
                for token in significant_tokens(field) {
                    token_leagues
                        .entry(token)
                        .or_default()
                        .insert(team.league.clone());
                }
            }

            by_league
                .entry(team.league.clone())
                .or_default()
                .push(team);
        }

        Self {
            built_at: Utc::now(),
            by_league,
            league_provider,
            token_leagues,
            team_leagues,
            soccer_leagues,
        }
    }

    pub fn teams_in(&self, league: &str) -> &[Arc<Team>] {
        self.by_league
            .get(league)
            .map(|teams| teams.as_slice())
            .unwrap_or(&[])
    }

    pub fn leagues(&self) -> impl Iterator<Item = &String> {
        self.by_league.keys()
    }

    pub fn provider_of(&self, league: &str) -> Option<&str> {
        self.league_provider.get(league).map(|s| s.as_str())
    }

    /// Expand selectors into concrete league slugs, preserving order and
    /// dropping duplicates.
    pub fn expand_groups(&self, selectors: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for selector in selectors {
            if selector == SOCCER_ALL {
                for league in &self.soccer_leagues {
                    if seen.insert(league.clone()) {
                        out.push(league.clone());
                    }
                }
            } else if seen.insert(selector.clone()) {
                out.push(selector.clone());
            }
        }
        out
    }

    /// All leagues a team participates in.
    pub fn leagues_for_team(&self, provider: &str, provider_team_id: &str) -> Vec<String> {
        self.team_leagues
            .get(&format!("{provider}:{provider_team_id}"))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn leagues_with_token_match(&self, side: &str) -> BTreeSet<String> {
        let mut leagues = BTreeSet::new();
        for token in significant_tokens(side) {
            if let Some(set) = self.token_leagues.get(&token) {
                leagues.extend(set.iter().cloned());
            }
        }
        leagues
    }

    /// Leagues in which both names plausibly exist, as a search-space
    /// prefilter for the matcher. Not a match by itself.
    pub fn candidate_leagues(&self, side_a: &str, side_b: &str) -> Vec<(String, String)> {
        let leagues_a = self.leagues_with_token_match(side_a);
        if leagues_a.is_empty() {
            return Vec::new();
        }
        let leagues_b = self.leagues_with_token_match(side_b);

        leagues_a
            .intersection(&leagues_b)
            .map(|league| {
                (
                    league.clone(),
                    self.league_provider
                        .get(league)
                        .cloned()
                        .unwrap_or_default(),
                )
            })
            .collect()
    }
}

/// Periodically refreshed holder of the current index.
pub struct TeamLeagueCache {
    db: Database,
    registry: Arc<ProviderRegistry>,
    index: RwLock<Arc<TeamLeagueIndex>>,
}

impl TeamLeagueCache {
    /// Build from the persisted snapshot so startups are warm; an empty
    /// index if the store has never been refreshed.
    pub async fn new(db: Database, registry: Arc<ProviderRegistry>) -> Result<Self, AppError> {
        let teams = db
            .load_team_league_snapshot()
            .await
            .map_err(|e| AppError::internal(format!("team/league snapshot load: {e}")))?;

        let mut league_provider = HashMap::new();
        for team in &teams {
            league_provider
                .entry(team.league.clone())
                .or_insert_with(|| team.provider.clone());
        }

        let index = if teams.is_empty() {
            TeamLeagueIndex::empty()
        } else {
            let mut index = TeamLeagueIndex::build(teams, league_provider);
            // Age from the persisted snapshot, not from this load
            if let Ok(Some(refreshed_at)) = db.team_league_snapshot_refreshed_at().await {
                index.built_at = refreshed_at;
            }
            index
        };

        Ok(Self {
            db,
            registry,
            index: RwLock::new(Arc::new(index)),
        })
    }

    /// The current snapshot. Cheap; never blocks on a refresh.
    pub fn snapshot(&self) -> Arc<TeamLeagueIndex> {
        self.index.read().expect("index lock poisoned").clone()
    }

    /// Full rebuild from every enabled adapter, then atomic swap-in.
    /// Idempotent; failures on individual leagues are logged and skipped.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        info!("Refreshing team/league cache");
        let mut teams: Vec<Team> = Vec::new();
        let mut league_provider = HashMap::new();

        for entry in self.registry.enabled_entries() {
            for league in entry.adapter.supported_leagues() {
                if cancel.is_cancelled() {
                    return Err(AppError::Canceled);
                }
                // Leagues routed to a preferred adapter are indexed once
                let routed = self
                    .registry
                    .adapter_for(&league)
                    .map(|e| e.name.clone())
                    .unwrap_or_default();
                if routed != entry.name {
                    continue;
                }

                match entry.adapter.league_teams(&league, cancel).await {
                    Ok(league_teams) => {
                        league_provider.insert(league.clone(), entry.name.clone());
                        teams.extend(league_teams);
                    }
                    Err(e) => {
                        warn!("Skipping league '{}' during cache refresh: {}", league, e);
                    }
                }
            }
        }

        let team_count = teams.len();
        self.db
            .save_team_league_snapshot(&teams)
            .await
            .map_err(|e| AppError::internal(format!("team/league snapshot save: {e}")))?;

        let shadow = Arc::new(TeamLeagueIndex::build(teams, league_provider));
        *self.index.write().expect("index lock poisoned") = shadow;

        info!("Team/league cache refreshed: {} teams indexed", team_count);
        Ok(())
    }

    /// Rebuild when the snapshot is cold or older than `max_age`. The weekly
    /// policy: callers pass seven days; `cache refresh` forces a rebuild.
    pub async fn ensure_fresh(
        &self,
        max_age: chrono::Duration,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let snapshot = self.snapshot();
        let stale = snapshot.is_empty() || Utc::now() - snapshot.built_at > max_age;
        if stale {
            self.refresh(cancel).await?;
        }
        Ok(())
    }
}

impl TeamLeagueIndex {
    pub fn is_empty(&self) -> bool {
        self.by_league.values().all(|teams| teams.is_empty())
    }
}
