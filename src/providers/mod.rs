//! Sports-data provider abstraction.
//!
//! Each adapter exposes the same capability set over one upstream API; wire
//! shapes never leave the adapter. Upstream components reach adapters only
//! through [`registry::ProviderRegistry`] via the data service.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::models::{Event, Team, TeamStats};

pub mod espn;
pub mod http;
pub mod registry;
pub mod sportsdb;

pub use registry::ProviderRegistry;

/// Snapshot of one adapter's HTTP counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub provider: String,
    pub requests: u64,
    pub retries: u64,
    /// Sleeps taken because the local sliding window was saturated
    pub preemptive_waits: u64,
    /// Sleeps taken because the provider answered 429
    pub rate_limit_waits: u64,
    pub failures: u64,
}

/// Uniform capability set over heterogeneous sports APIs.
///
/// All operations are GETs and therefore safely retriable; missing entities
/// come back as `Ok(None)` rather than errors.
#[async_trait]
pub trait SportsProvider: Send + Sync {
    fn name(&self) -> &str;

    fn supports_league(&self, league: &str) -> bool;

    fn supported_leagues(&self) -> Vec<String>;

    /// All events in a league on one date (the league's scoreboard).
    async fn events_on(
        &self,
        league: &str,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, ProviderError>;

    /// A team's upcoming schedule, bounded by `days_ahead`.
    async fn team_schedule(
        &self,
        team_id: &str,
        league: &str,
        days_ahead: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, ProviderError>;

    async fn team(
        &self,
        team_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Team>, ProviderError>;

    async fn event(
        &self,
        event_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Event>, ProviderError>;

    async fn team_stats(
        &self,
        team_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TeamStats>, ProviderError>;

    /// Full team universe of a league, for the team/league cache.
    async fn league_teams(
        &self,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Team>, ProviderError>;

    fn stats(&self) -> ProviderStats;

    fn reset_stats(&self);
}
