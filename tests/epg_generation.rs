//! Full pipeline runs against scripted providers and a fake manager:
//! team EPG with filler, event EPG with channel lifecycle, determinism.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use teamarr::database::Database;
use teamarr::epg::EpgOrchestrator;
use teamarr::manager::ManagerApi;
use teamarr::models::{
    CreateTiming, DuplicateMode, EventGroup, RunStatus, Settings, Sport, TeamChannelConfig,
};
use teamarr::providers::ProviderRegistry;
use teamarr::services::{SportsDataService, TeamLeagueCache};
use teamarr::testing_utils::{event_fixture, team_fixture, FakeManager, ScriptedProvider};

struct Harness {
    db: Database,
    orchestrator: EpgOrchestrator,
    provider: Arc<ScriptedProvider>,
    manager: Option<Arc<FakeManager>>,
    output: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn harness(provider: ScriptedProvider, manager: Option<FakeManager>) -> Harness {
    let db = Database::new_in_memory().await.unwrap();
    let provider = Arc::new(provider);
    let mut registry = ProviderRegistry::new();
    registry.register("scripted", provider.clone(), 10, true);
    let registry = Arc::new(registry);

    let data = Arc::new(SportsDataService::new(registry.clone(), HashMap::new()));
    let team_cache = Arc::new(TeamLeagueCache::new(db.clone(), registry).await.unwrap());
    team_cache.refresh(&CancellationToken::new()).await.unwrap();

    let manager = manager.map(Arc::new);
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("epg.xml");

    let orchestrator = EpgOrchestrator::new(
        db.clone(),
        data,
        team_cache,
        manager
            .clone()
            .map(|m| m as Arc<dyn ManagerApi>),
        output.clone(),
        Vec::new(),
    );

    Harness {
        db,
        orchestrator,
        provider,
        manager,
        output,
        _dir: dir,
    }
}

fn midnight_in(days: i64) -> DateTime<Utc> {
    (Utc::now() + Duration::days(days))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

fn pistons_provider(game_one: DateTime<Utc>, game_two: DateTime<Utc>) -> ScriptedProvider {
    let pistons = team_fixture(
        "scripted", "8", "nba", Sport::Basketball,
        "Detroit Pistons", "Pistons", "DET", "Detroit",
    );
    let pacers = team_fixture(
        "scripted", "11", "nba", Sport::Basketball,
        "Indiana Pacers", "Pacers", "IND", "Indiana",
    );
    let bulls = team_fixture(
        "scripted", "4", "nba", Sport::Basketball,
        "Chicago Bulls", "Bulls", "CHI", "Chicago",
    );
    ScriptedProvider::new("scripted", &["nba"])
        .with_teams(vec![pistons.clone(), pacers.clone(), bulls.clone()])
        .with_events(vec![
            event_fixture(
                "9001", "nba", Sport::Basketball, game_one, pistons.clone(), pacers,
            ),
            event_fixture("9002", "nba", Sport::Basketball, game_two, bulls, pistons),
        ])
}

async fn seed_pistons_channel(db: &Database) {
    db.save_team_channel(&TeamChannelConfig {
        id: Uuid::new_v4(),
        provider: "scripted".to_string(),
        provider_team_id: "8".to_string(),
        league: "nba".to_string(),
        channel_id: "pistons.nba".to_string(),
        display_name: "Detroit Pistons".to_string(),
        logo_url: None,
        template_id: None,
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    })
    .await
    .unwrap();
}

/// Extract `(start, stop)` attribute pairs for one channel, in document order.
fn programme_bounds(document: &str, channel: &str) -> Vec<(String, String)> {
    let needle = format!("channel=\"{channel}\"");
    document
        .lines()
        .filter(|line| line.contains("<programme ") && line.contains(&needle))
        .map(|line| {
            let grab = |attr: &str| {
                let from = line.find(attr).unwrap() + attr.len();
                line[from..from + 20].to_string()
            };
            (grab("start=\""), grab("stop=\""))
        })
        .collect()
}

#[tokio::test]
async fn team_epg_with_filler_and_ordering() {
    let game_one = midnight_in(1);
    let game_two = midnight_in(3);
    let h = harness(pistons_provider(game_one, game_two), None).await;
    seed_pistons_channel(&h.db).await;

    let record = h
        .orchestrator
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(record.generation, 1);
    assert_eq!(record.counters.events_processed, 2);
    assert!(record.counters.programmes_emitted > 2, "games plus filler");

    let document = tokio::fs::read_to_string(&h.output).await.unwrap();
    assert!(document.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(document.contains("<!DOCTYPE tv SYSTEM \"xmltv.dtd\">"));
    assert!(document.contains("<channel id=\"pistons.nba\">"));

    // Both games present with stop = start + 3h, marked new, never live
    let game_start = game_one.format("%Y%m%d%H%M%S +0000").to_string();
    let game_stop = (game_one + Duration::hours(3))
        .format("%Y%m%d%H%M%S +0000")
        .to_string();
    assert!(document.contains(&format!("start=\"{game_start}\" stop=\"{game_stop}\"")));
    assert!(document.contains("<new/>"));
    assert!(!document.contains("<live/>"));

    // Postgame filler fills 03:00 → 09:00 after the first game
    let postgame_start = (game_one + Duration::hours(3))
        .format("%Y%m%d%H%M%S +0000")
        .to_string();
    assert!(document.contains(&format!("start=\"{postgame_start}\"")));

    // Sorted strictly ascending, no overlap
    let bounds = programme_bounds(&document, "pistons.nba");
    assert!(bounds.len() > 2);
    for pair in bounds.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlap: {pair:?}");
        assert!(pair[0].0 < pair[1].0, "not ascending: {pair:?}");
    }
    // Gap-free from the first game to the second
    let from = bounds.iter().position(|b| b.0 == game_start).unwrap();
    for pair in bounds[from..].windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "unexpected gap: {pair:?}");
    }
}

#[tokio::test]
async fn warm_rerun_is_byte_identical_and_fetch_free() {
    let h = harness(pistons_provider(midnight_in(1), midnight_in(3)), None).await;
    seed_pistons_channel(&h.db).await;

    h.orchestrator.run(CancellationToken::new()).await.unwrap();
    let first = tokio::fs::read_to_string(&h.output).await.unwrap();
    assert!(h.provider.calls.load(std::sync::atomic::Ordering::Relaxed) > 0);

    let record = h
        .orchestrator
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.generation, 2);
    let second = tokio::fs::read_to_string(&h.output).await.unwrap();

    assert_eq!(first, second, "warm regeneration must be byte-identical");
    // Stats reset at run start, and the warm cache answered everything
    assert_eq!(
        h.provider.calls.load(std::sync::atomic::Ordering::Relaxed),
        0,
        "warm caches must answer the second run"
    );
}

#[tokio::test]
async fn event_group_creates_and_reconciles_channels() {
    let kickoff = midnight_in(2) + Duration::hours(18);
    let patriots = team_fixture(
        "scripted", "17", "nfl", Sport::Football,
        "New England Patriots", "Patriots", "NE", "New England",
    );
    let giants = team_fixture(
        "scripted", "19", "nfl", Sport::Football,
        "New York Giants", "Giants", "NYG", "New York",
    );
    let provider = ScriptedProvider::new("scripted", &["nfl"])
        .with_teams(vec![patriots.clone(), giants.clone()])
        .with_events(vec![event_fixture(
            "401772821",
            "nfl",
            Sport::Football,
            kickoff,
            patriots,
            giants,
        )]);

    let manager = FakeManager::with_streams(
        "US | NFL",
        vec![
            ("s1", "NFL | Giants at Patriots"),
            ("s2", "NFL | Giants at Patriots (backup feed)"),
            ("s3", "NFL | Replay: Classic Game"),
        ],
    );
    let h = harness(provider, Some(manager)).await;

    let mut settings = Settings::default();
    settings.channel_create_timing = CreateTiming::WeekBefore;
    h.db.update_settings(&settings).await.unwrap();

    h.db.save_event_group(&EventGroup {
        id: Uuid::new_v4(),
        name: "NFL Sunday".to_string(),
        m3u_group: "US | NFL".to_string(),
        league_selectors: vec!["nfl".to_string()],
        include_regex: None,
        exclude_regex: Some("(?i)replay".to_string()),
        duplicate_mode: DuplicateMode::Consolidate,
        include_final: false,
        template_id: None,
        channel_group: Some("Sports Events".to_string()),
        channel_start_number: Some(9000),
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    })
    .await
    .unwrap();

    let record = h
        .orchestrator
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.status, RunStatus::Success);
    // Two duplicate streams consolidate to one channel; the replay stream
    // is excluded before matching
    assert_eq!(record.counters.streams_matched, 2);
    assert_eq!(record.counters.streams_unmatched, 0);
    assert_eq!(record.counters.channels_created, 1);

    let fake = h.manager.as_ref().unwrap();
    {
        let channels = fake.channels.lock().unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].number, Some(9000));
        assert_eq!(channels[0].group.as_deref(), Some("Sports Events"));
        assert_eq!(
            channels[0].epg_channel_id.as_deref(),
            Some("nfl.sunday.401772821")
        );
    }

    let document = tokio::fs::read_to_string(&h.output).await.unwrap();
    assert!(document.contains("<channel id=\"nfl.sunday.401772821\">"));

    // Second run: nothing new to create, managed state unchanged
    let rows_before = h.db.list_managed_channels().await.unwrap();
    let record = h
        .orchestrator
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.counters.channels_created, 0);
    assert_eq!(record.counters.channels_deleted, 0);
    let rows_after = h.db.list_managed_channels().await.unwrap();
    assert_eq!(rows_before.len(), rows_after.len());
    assert_eq!(rows_before[0].id, rows_after[0].id);
    assert_eq!(
        rows_before[0].manager_channel_id,
        rows_after[0].manager_channel_id
    );
    assert_eq!(
        rows_before[0].scheduled_delete_at,
        rows_after[0].scheduled_delete_at
    );
}

#[tokio::test]
async fn abort_flag_cancels_run() {
    let h = harness(pistons_provider(midnight_in(1), midnight_in(3)), None).await;
    seed_pistons_channel(&h.db).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let record = h.orchestrator.run(cancel).await.unwrap();
    assert_eq!(record.status, RunStatus::Aborted);

    // The aborted run still produced an audit record with its generation
    let latest = h.db.latest_run_record().await.unwrap().unwrap();
    assert_eq!(latest.status, RunStatus::Aborted);
    assert_eq!(latest.generation, record.generation);
}
