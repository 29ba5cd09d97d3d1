//! The sports data service: the only path to provider data.
//!
//! Routes league → adapter through the registry (honoring persisted
//! overrides), caches read-through with date-aware TTLs, and coalesces
//! concurrent misses per key so at most one fetch is in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ProviderError;
use crate::models::{Event, Team, TeamStats};
use crate::providers::{ProviderRegistry, ProviderStats, SportsProvider};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Events { league: String, date: NaiveDate },
    Schedule { league: String, team: String },
    Event { league: String, id: String },
    Stats { league: String, team: String },
    Team { league: String, team: String },
}

#[derive(Clone)]
enum CacheValue {
    Events(Arc<Vec<Event>>),
    Event(Option<Arc<Event>>),
    Team(Option<Arc<Team>>),
    Stats(Option<Arc<TeamStats>>),
}

struct CacheEntry {
    value: CacheValue,
    fetched_at: DateTime<Utc>,
    generation: i64,
}

/// TTL for a key, evaluated at read time relative to `now`.
fn ttl_for(key: &CacheKey, now: DateTime<Utc>) -> Duration {
    match key {
        CacheKey::Events { date, .. } => {
            let today = now.date_naive();
            let offset = (*date - today).num_days();
            if offset < 0 {
                Duration::hours(8)
            } else if offset == 0 {
                Duration::minutes(30)
            } else if offset == 1 {
                Duration::hours(4)
            } else if offset <= 7 {
                Duration::hours(8)
            } else {
                Duration::hours(24)
            }
        }
        CacheKey::Schedule { .. } => Duration::hours(8),
        CacheKey::Event { .. } => Duration::minutes(30),
        CacheKey::Stats { .. } => Duration::hours(4),
        CacheKey::Team { .. } => Duration::hours(24),
    }
}

pub struct SportsDataService {
    registry: Arc<ProviderRegistry>,
    /// Persisted league → provider-name routing overrides
    overrides: HashMap<String, String>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    flights: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    generation: AtomicI64,
}

impl SportsDataService {
    pub fn new(registry: Arc<ProviderRegistry>, overrides: HashMap<String, String>) -> Self {
        Self {
            registry,
            overrides,
            cache: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            generation: AtomicI64::new(0),
        }
    }

    /// Mark entries fetched from here on as belonging to `generation`; such
    /// entries stay fresh for the whole run even if their TTL lapses mid-run.
    pub fn set_generation(&self, generation: i64) {
        self.generation.store(generation, Ordering::Relaxed);
    }

    pub fn provider_stats(&self) -> Vec<ProviderStats> {
        self.registry.provider_stats()
    }

    pub fn reset_provider_stats(&self) {
        self.registry.reset_provider_stats();
    }

    /// Resolve the adapter for a league, or fail with `UnsupportedLeague`.
    fn route(&self, league: &str) -> Result<Arc<dyn SportsProvider>, ProviderError> {
        if let Some(name) = self.overrides.get(league) {
            if let Some(entry) = self.registry.adapter_named(name) {
                if entry.adapter.supports_league(league) {
                    return Ok(entry.adapter.clone());
                }
            }
        }
        self.registry
            .adapter_for(league)
            .map(|entry| entry.adapter.clone())
            .ok_or_else(|| ProviderError::UnsupportedLeague(league.to_string()))
    }

    /// The provider actually serving a league, for the team/league cache.
    pub fn provider_for(&self, league: &str) -> Option<String> {
        self.route(league).ok().map(|a| a.name().to_string())
    }

    pub async fn events_on(
        &self,
        league: &str,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Event>>, ProviderError> {
        let key = CacheKey::Events {
            league: league.to_string(),
            date,
        };
        match self.get_or_fetch(key, cancel).await? {
            CacheValue::Events(events) => Ok(events),
            _ => unreachable!("events key yields events value"),
        }
    }

    pub async fn team_schedule(
        &self,
        team_id: &str,
        league: &str,
        days_ahead: i64,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Event>>, ProviderError> {
        let key = CacheKey::Schedule {
            league: league.to_string(),
            team: format!("{team_id}:{days_ahead}"),
        };
        match self.get_or_fetch(key, cancel).await? {
            CacheValue::Events(events) => Ok(events),
            _ => unreachable!("schedule key yields events value"),
        }
    }

    pub async fn event(
        &self,
        event_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<Event>>, ProviderError> {
        let key = CacheKey::Event {
            league: league.to_string(),
            id: event_id.to_string(),
        };
        match self.get_or_fetch(key, cancel).await? {
            CacheValue::Event(event) => Ok(event),
            _ => unreachable!("event key yields event value"),
        }
    }

    pub async fn team(
        &self,
        team_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<Team>>, ProviderError> {
        let key = CacheKey::Team {
            league: league.to_string(),
            team: team_id.to_string(),
        };
        match self.get_or_fetch(key, cancel).await? {
            CacheValue::Team(team) => Ok(team),
            _ => unreachable!("team key yields team value"),
        }
    }

    pub async fn team_stats(
        &self,
        team_id: &str,
        league: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<TeamStats>>, ProviderError> {
        let key = CacheKey::Stats {
            league: league.to_string(),
            team: team_id.to_string(),
        };
        match self.get_or_fetch(key, cancel).await? {
            CacheValue::Stats(stats) => Ok(stats),
            _ => unreachable!("stats key yields stats value"),
        }
    }

    async fn read_fresh(&self, key: &CacheKey) -> Option<CacheValue> {
        let cache = self.cache.read().await;
        let entry = cache.get(key)?;
        let now = Utc::now();
        let current_generation = self.generation.load(Ordering::Relaxed);
        let within_ttl = now - entry.fetched_at < ttl_for(key, now);
        let same_run = current_generation > 0 && entry.generation == current_generation;
        (within_ttl || same_run).then(|| entry.value.clone())
    }

    async fn get_or_fetch(
        &self,
        key: CacheKey,
        cancel: &CancellationToken,
    ) -> Result<CacheValue, ProviderError> {
        if let Some(value) = self.read_fresh(&key).await {
            return Ok(value);
        }

        // Single-flight: losers of the race wait here, then re-read
        let flight = {
            let mut flights = self.flights.lock().await;
            flights
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = flight.lock().await;

        if let Some(value) = self.read_fresh(&key).await {
            return Ok(value);
        }

        if cancel.is_cancelled() {
            return Err(ProviderError::Canceled);
        }

        debug!(?key, "Cache miss, fetching from provider");
        let value = self.fetch(&key, cancel).await?;

        {
            let mut cache = self.cache.write().await;
            cache.insert(
                key.clone(),
                CacheEntry {
                    value: value.clone(),
                    fetched_at: Utc::now(),
                    generation: self.generation.load(Ordering::Relaxed),
                },
            );
        }
        {
            let mut flights = self.flights.lock().await;
            flights.remove(&key);
        }

        Ok(value)
    }

    async fn fetch(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<CacheValue, ProviderError> {
        match key {
            CacheKey::Events { league, date } => {
                let adapter = self.route(league)?;
                let events = adapter.events_on(league, *date, cancel).await?;
                Ok(CacheValue::Events(Arc::new(events)))
            }
            CacheKey::Schedule { league, team } => {
                let adapter = self.route(league)?;
                let (team_id, days) = team
                    .rsplit_once(':')
                    .map(|(id, days)| (id, days.parse().unwrap_or(30)))
                    .unwrap_or((team.as_str(), 30));
                let events = adapter.team_schedule(team_id, league, days, cancel).await?;
                Ok(CacheValue::Events(Arc::new(events)))
            }
            CacheKey::Event { league, id } => {
                let adapter = self.route(league)?;
                let event = adapter.event(id, league, cancel).await?;
                Ok(CacheValue::Event(event.map(Arc::new)))
            }
            CacheKey::Team { league, team } => {
                let adapter = self.route(league)?;
                let found = adapter.team(team, league, cancel).await?;
                Ok(CacheValue::Team(found.map(Arc::new)))
            }
            CacheKey::Stats { league, team } => {
                let adapter = self.route(league)?;
                let stats = adapter.team_stats(team, league, cancel).await?;
                Ok(CacheValue::Stats(stats.map(Arc::new)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_utils::{nfl_event, ScriptedProvider};

    fn service_with_one_event() -> (SportsDataService, DateTime<Utc>) {
        let start = Utc::now() + Duration::hours(2);
        let mut provider = ScriptedProvider::new("static", &["nfl"]);
        provider.events.push(nfl_event("401772821", start));

        let mut registry = ProviderRegistry::new();
        registry.register("static", Arc::new(provider), 10, true);
        (
            SportsDataService::new(Arc::new(registry), HashMap::new()),
            start,
        )
    }

    #[test]
    fn ttl_tiers_by_date_proximity() {
        let now = Utc::now();
        let today = now.date_naive();
        let key = |offset: i64| CacheKey::Events {
            league: "nfl".to_string(),
            date: today + Duration::days(offset),
        };

        assert_eq!(ttl_for(&key(-1), now), Duration::hours(8));
        assert_eq!(ttl_for(&key(0), now), Duration::minutes(30));
        assert_eq!(ttl_for(&key(1), now), Duration::hours(4));
        assert_eq!(ttl_for(&key(2), now), Duration::hours(8));
        assert_eq!(ttl_for(&key(7), now), Duration::hours(8));
        assert_eq!(ttl_for(&key(8), now), Duration::hours(24));
        assert_eq!(ttl_for(&key(30), now), Duration::hours(24));
    }

    #[test]
    fn ttl_for_non_date_operations() {
        let now = Utc::now();
        let league = "nfl".to_string();
        assert_eq!(
            ttl_for(
                &CacheKey::Schedule {
                    league: league.clone(),
                    team: "17:30".into()
                },
                now
            ),
            Duration::hours(8)
        );
        assert_eq!(
            ttl_for(
                &CacheKey::Event {
                    league: league.clone(),
                    id: "1".into()
                },
                now
            ),
            Duration::minutes(30)
        );
        assert_eq!(
            ttl_for(
                &CacheKey::Stats {
                    league: league.clone(),
                    team: "17".into()
                },
                now
            ),
            Duration::hours(4)
        );
        assert_eq!(
            ttl_for(
                &CacheKey::Team {
                    league,
                    team: "17".into()
                },
                now
            ),
            Duration::hours(24)
        );
    }

    #[tokio::test]
    async fn warm_cache_answers_without_provider_calls() {
        let (service, start) = service_with_one_event();
        let cancel = CancellationToken::new();
        let date = start.date_naive();

        let first = service.events_on("nfl", date, &cancel).await.unwrap();
        assert_eq!(first.len(), 1);
        let requests_after_first = service.provider_stats()[0].requests;

        for _ in 0..5 {
            service.events_on("nfl", date, &cancel).await.unwrap();
        }
        assert_eq!(service.provider_stats()[0].requests, requests_after_first);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce_to_one_fetch() {
        let (service, start) = service_with_one_event();
        let service = Arc::new(service);
        let cancel = CancellationToken::new();
        let date = start.date_naive();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                service.events_on("nfl", date, &cancel).await.unwrap().len()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }

        assert_eq!(service.provider_stats()[0].requests, 1);
    }

    #[tokio::test]
    async fn unsupported_league_fails_fast() {
        let (service, _) = service_with_one_event();
        let cancel = CancellationToken::new();
        let result = service
            .events_on("liiga", Utc::now().date_naive(), &cancel)
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::UnsupportedLeague(league)) if league == "liiga"
        ));
    }

    #[tokio::test]
    async fn generation_keeps_entries_fresh_past_ttl() {
        let (service, start) = service_with_one_event();
        let cancel = CancellationToken::new();
        let date = start.date_naive();

        service.set_generation(3);
        service.events_on("nfl", date, &cancel).await.unwrap();

        // Force the entry past every TTL tier by rewriting fetched_at
        {
            let mut cache = service.cache.write().await;
            for entry in cache.values_mut() {
                entry.fetched_at = Utc::now() - Duration::hours(25);
            }
        }

        service.events_on("nfl", date, &cancel).await.unwrap();
        assert_eq!(
            service.provider_stats()[0].requests, 1,
            "same-generation entry must not refetch"
        );

        // Next run invalidates it
        service.set_generation(4);
        service.events_on("nfl", date, &cancel).await.unwrap();
        assert_eq!(service.provider_stats()[0].requests, 2);
    }
}
