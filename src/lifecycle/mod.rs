//! Channel lifecycle reconciliation: decides when downstream channels exist,
//! keeps their settings in sync, and schedules deletions.
//!
//! Consumes the matched-event set from the event-EPG phase plus the
//! persisted managed-channel set. Every manager failure is recorded and
//! skipped; reconciliation never aborts the run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::errors::AppError;
use crate::manager::{ChannelSpec, ManagerApi};
use crate::models::{
    DeleteTiming, Event, EventGroup, ManagedChannel, Settings,
};
use crate::utils::datetime::end_of_local_day;

/// One matched event as the orchestrator hands it over.
#[derive(Debug, Clone)]
pub struct MatchedEvent {
    pub group: EventGroup,
    /// XMLTV channel id the EPG was keyed to
    pub channel_id: String,
    pub channel_name: String,
    pub stream_id: String,
    pub event: Event,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub created: i64,
    pub deleted: i64,
    pub updated: i64,
    pub orphans: Vec<String>,
    pub duplicates: Vec<String>,
    pub issues: Vec<String>,
}

pub struct ChannelReconciler {
    db: Database,
    manager: Arc<dyn ManagerApi>,
    settings: Settings,
    tz: Tz,
}

impl ChannelReconciler {
    pub fn new(db: Database, manager: Arc<dyn ManagerApi>, settings: Settings, tz: Tz) -> Self {
        Self {
            db,
            manager,
            settings,
            tz,
        }
    }

    /// Whether a channel for `event` should exist at `now` under the
    /// configured creation timing.
    fn creation_due(&self, event: &Event, now: DateTime<Utc>) -> bool {
        let lead = self.settings.channel_create_timing.lead_days();
        let event_date = event.start_time.with_timezone(&self.tz).date_naive();
        let now_date = now.with_timezone(&self.tz).date_naive();
        now_date >= event_date - Duration::days(lead)
    }

    /// When the channel becomes deletable. `None` means manual only.
    fn scheduled_delete_at(&self, event: &Event) -> Option<DateTime<Utc>> {
        let event_end =
            event.start_time + hours(self.settings.duration_hours(event.sport));
        match self.settings.channel_delete_timing {
            DeleteTiming::StreamRemoved => Some(event_end),
            DeleteTiming::EndOfDay => Some(end_of_local_day(event_end, self.tz)),
            DeleteTiming::EndOfNextDay => {
                Some(end_of_local_day(event_end + Duration::days(1), self.tz))
            }
            DeleteTiming::Manual => None,
        }
    }

    pub async fn reconcile(
        &self,
        matched: &[MatchedEvent],
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, AppError> {
        let mut report = ReconcileReport::default();

        let existing = self.db.list_managed_channels().await.map_err(db_err)?;
        let mut by_key: HashMap<(Uuid, String), ManagedChannel> = existing
            .iter()
            .map(|mc| ((mc.group_id, mc.channel_id.clone()), mc.clone()))
            .collect();

        let manager_channels = match self.manager.list_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                report
                    .issues
                    .push(format!("manager unavailable, lifecycle skipped: {e}"));
                return Ok(report);
            }
        };
        let manager_by_id: HashMap<i64, &crate::manager::ManagerChannel> =
            manager_channels.iter().map(|c| (c.id, c)).collect();

        // Deterministic processing order; channel numbers follow it
        let mut ordered: Vec<&MatchedEvent> = matched.iter().collect();
        ordered.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));

        let mut group_offsets: HashMap<Uuid, i64> = HashMap::new();
        let mut seen_keys: HashSet<(Uuid, String)> = HashSet::new();

        for entry in ordered {
            let key = (entry.group.id, entry.channel_id.clone());
            seen_keys.insert(key.clone());

            let offset = group_offsets.entry(entry.group.id).or_insert(0);
            let number = entry
                .group
                .channel_start_number
                .map(|start| start + *offset);
            *offset += 1;

            let spec = ChannelSpec {
                name: entry.channel_name.clone(),
                number,
                group: entry.group.channel_group.clone(),
                logo_url: entry.event.home_team.logo_url.clone(),
                stream_id: Some(entry.stream_id.clone()),
            };
            let scheduled_delete_at = self.scheduled_delete_at(&entry.event);

            match by_key.get(&key) {
                None => {
                    if !self.creation_due(&entry.event, now) {
                        continue;
                    }
                    match self.manager.create_channel(&spec).await {
                        Ok(created) => {
                            if let Err(e) = self
                                .manager
                                .set_channel_epg(created.id, &entry.channel_id)
                                .await
                            {
                                report.issues.push(format!(
                                    "EPG binding failed for '{}': {e}",
                                    entry.channel_name
                                ));
                            }
                            let row = ManagedChannel {
                                id: Uuid::new_v4(),
                                group_id: entry.group.id,
                                manager_channel_id: created.id,
                                channel_id: entry.channel_id.clone(),
                                event_id: entry.event.provider_event_id.clone(),
                                league: entry.event.league.clone(),
                                home_team_name: entry.event.home_team.name.clone(),
                                away_team_name: entry.event.away_team.name.clone(),
                                scheduled_delete_at,
                                created_at: now,
                                updated_at: now,
                            };
                            self.db.upsert_managed_channel(&row).await.map_err(db_err)?;
                            by_key.insert(key, row);
                            report.created += 1;
                            info!("Created channel '{}'", entry.channel_name);
                        }
                        Err(e) => {
                            report.issues.push(format!(
                                "channel create failed for '{}': {e}",
                                entry.channel_name
                            ));
                        }
                    }
                }
                Some(existing_row) => {
                    // Settings synchronization: push drift back to the manager
                    let drifted = manager_by_id
                        .get(&existing_row.manager_channel_id)
                        .map(|mc| {
                            mc.name != spec.name
                                || mc.number != spec.number
                                || mc.group != spec.group
                        })
                        .unwrap_or(false);
                    if drifted {
                        match self
                            .manager
                            .update_channel(existing_row.manager_channel_id, &spec)
                            .await
                        {
                            Ok(()) => report.updated += 1,
                            Err(e) => report.issues.push(format!(
                                "channel sync failed for '{}': {e}",
                                entry.channel_name
                            )),
                        }
                    }

                    let mut row = existing_row.clone();
                    row.event_id = entry.event.provider_event_id.clone();
                    row.scheduled_delete_at = scheduled_delete_at;
                    self.db.upsert_managed_channel(&row).await.map_err(db_err)?;
                    by_key.insert(key, row);
                }
            }
        }

        // Channels for events no longer matched: delete once due
        for row in &existing {
            let key = (row.group_id, row.channel_id.clone());
            if seen_keys.contains(&key) {
                continue;
            }
            let Some(due) = row.scheduled_delete_at else {
                continue; // manual
            };
            if now < due {
                continue;
            }
            match self.manager.delete_channel(row.manager_channel_id).await {
                Ok(()) => {
                    self.db.delete_managed_channel(row.id).await.map_err(db_err)?;
                    report.deleted += 1;
                    info!(
                        "Deleted channel '{}' ({} at {})",
                        row.channel_id, row.away_team_name, row.home_team_name
                    );
                }
                Err(e) => {
                    warn!("Channel delete failed for '{}': {}", row.channel_id, e);
                    report
                        .issues
                        .push(format!("channel delete failed for '{}': {e}", row.channel_id));
                }
            }
        }

        // Orphans: manager channels bound to our EPG namespace without a row
        let known_manager_ids: HashSet<i64> =
            by_key.values().map(|row| row.manager_channel_id).collect();
        let our_prefixes: HashSet<&str> = matched
            .iter()
            .map(|m| m.group.name.as_str())
            .collect();
        for channel in &manager_channels {
            let ours = channel
                .epg_channel_id
                .as_deref()
                .map(|epg| {
                    our_prefixes
                        .iter()
                        .any(|prefix| epg.starts_with(&slug(prefix)))
                })
                .unwrap_or(false);
            if ours && !known_manager_ids.contains(&channel.id) {
                report
                    .orphans
                    .push(format!("{} (manager id {})", channel.name, channel.id));
            }
        }

        // Duplicates: two rows pointing at the same downstream channel
        let mut counts: HashMap<i64, u32> = HashMap::new();
        for row in by_key.values() {
            *counts.entry(row.manager_channel_id).or_insert(0) += 1;
        }
        for (manager_id, count) in counts {
            if count > 1 {
                report
                    .duplicates
                    .push(format!("manager id {manager_id} referenced {count} times"));
            }
        }
        report.orphans.sort();
        report.duplicates.sort();

        Ok(report)
    }
}

fn hours(value: f64) -> Duration {
    Duration::seconds((value * 3600.0) as i64)
}

fn db_err(e: anyhow::Error) -> AppError {
    AppError::internal(format!("managed channel store: {e}"))
}

/// XMLTV channel-id prefix for a group name.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('.') && !out.is_empty() {
            out.push('.');
        }
    }
    out.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerChannel;
    use crate::models::{CreateTiming, DuplicateMode};
    use crate::testing_utils::{nfl_event, FakeManager};

    fn group() -> EventGroup {
        EventGroup {
            id: Uuid::new_v4(),
            name: "NFL Sunday".to_string(),
            m3u_group: "US | NFL".to_string(),
            league_selectors: vec!["nfl".to_string()],
            include_regex: None,
            exclude_regex: None,
            duplicate_mode: DuplicateMode::Consolidate,
            include_final: false,
            template_id: None,
            channel_group: Some("Sports Events".to_string()),
            channel_start_number: Some(9000),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn matched(group: &EventGroup, event: Event) -> MatchedEvent {
        let channel_id = format!("{}.{}", slug(&group.name), event.provider_event_id);
        MatchedEvent {
            group: group.clone(),
            channel_name: format!(
                "{} at {}",
                event.away_team.name, event.home_team.name
            ),
            stream_id: "s1".to_string(),
            event,
            channel_id,
        }
    }

    async fn make_reconciler(settings: Settings) -> (ChannelReconciler, Arc<FakeManager>, Database) {
        let db = Database::new_in_memory().await.unwrap();
        let manager = Arc::new(FakeManager::default());
        let reconciler = ChannelReconciler::new(
            db.clone(),
            manager.clone(),
            settings,
            chrono_tz::UTC,
        );
        (reconciler, manager, db)
    }

    #[tokio::test]
    async fn creates_channel_when_timing_due() {
        let mut settings = Settings::default();
        settings.channel_create_timing = CreateTiming::DayBefore;
        let (reconciler, manager, db) = make_reconciler(settings).await;

        let now: DateTime<Utc> = "2025-12-01T12:00:00Z".parse().unwrap();
        let group = group();

        // Three days out: not due yet
        let far = matched(&group, nfl_event("1", "2025-12-04T18:00:00Z".parse().unwrap()));
        let report = reconciler.reconcile(&[far], now).await.unwrap();
        assert_eq!(report.created, 0);
        assert!(db.list_managed_channels().await.unwrap().is_empty());

        // Tomorrow: due under day_before
        let near = matched(&group, nfl_event("2", "2025-12-02T18:00:00Z".parse().unwrap()));
        let report = reconciler.reconcile(&[near], now).await.unwrap();
        assert_eq!(report.created, 1);

        let rows = db.list_managed_channels().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_id, "2");
        assert_eq!(manager.channels.lock().unwrap().len(), 1);
        assert_eq!(manager.channels.lock().unwrap()[0].number, Some(9000));
        // EPG binding points the manager at our XMLTV channel id
        let bindings = manager.epg_bindings.lock().unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(bindings[0].1.starts_with("nfl.sunday."));
    }

    #[tokio::test]
    async fn delete_policies_schedule_correctly() {
        let start: DateTime<Utc> = "2025-12-02T18:00:00Z".parse().unwrap();
        let event = nfl_event("1", start);
        // Football: 3.5h, so the event ends 21:30Z

        let (reconciler, _, _) = make_reconciler(Settings::default()).await;
        assert_eq!(
            reconciler.scheduled_delete_at(&event).unwrap(),
            "2025-12-02T23:59:59Z".parse::<DateTime<Utc>>().unwrap()
        );

        let mut settings = Settings::default();
        settings.channel_delete_timing = DeleteTiming::StreamRemoved;
        let (reconciler, _, _) = make_reconciler(settings).await;
        assert_eq!(
            reconciler.scheduled_delete_at(&event).unwrap(),
            "2025-12-02T21:30:00Z".parse::<DateTime<Utc>>().unwrap()
        );

        let mut settings = Settings::default();
        settings.channel_delete_timing = DeleteTiming::EndOfNextDay;
        let (reconciler, _, _) = make_reconciler(settings).await;
        assert_eq!(
            reconciler.scheduled_delete_at(&event).unwrap(),
            "2025-12-03T23:59:59Z".parse::<DateTime<Utc>>().unwrap()
        );

        let mut settings = Settings::default();
        settings.channel_delete_timing = DeleteTiming::Manual;
        let (reconciler, _, _) = make_reconciler(settings).await;
        assert_eq!(reconciler.scheduled_delete_at(&event), None);
    }

    #[tokio::test]
    async fn deletes_unmatched_channels_once_due() {
        let (reconciler, manager, db) = make_reconciler(Settings::default()).await;
        let group = group();
        let start: DateTime<Utc> = "2025-12-02T18:00:00Z".parse().unwrap();
        let entry = matched(&group, nfl_event("1", start));

        let run1: DateTime<Utc> = "2025-12-02T12:00:00Z".parse().unwrap();
        reconciler.reconcile(&[entry], run1).await.unwrap();
        assert_eq!(db.list_managed_channels().await.unwrap().len(), 1);

        // Stream gone, but deletion not yet due (end of day)
        let run2: DateTime<Utc> = "2025-12-02T22:00:00Z".parse().unwrap();
        let report = reconciler.reconcile(&[], run2).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(db.list_managed_channels().await.unwrap().len(), 1);

        // Past 23:59:59 local: delete
        let run3: DateTime<Utc> = "2025-12-03T00:30:00Z".parse().unwrap();
        let report = reconciler.reconcile(&[], run3).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(db.list_managed_channels().await.unwrap().is_empty());
        assert_eq!(manager.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn back_to_back_runs_are_idempotent() {
        let (reconciler, manager, db) = make_reconciler(Settings::default()).await;
        let group = group();
        let now: DateTime<Utc> = "2025-12-02T12:00:00Z".parse().unwrap();
        let entry = matched(&group, nfl_event("1", "2025-12-02T18:00:00Z".parse().unwrap()));

        let first = reconciler.reconcile(&[entry.clone()], now).await.unwrap();
        assert_eq!(first.created, 1);
        let rows_after_first = db.list_managed_channels().await.unwrap();

        let second = reconciler.reconcile(&[entry], now).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.deleted, 0);
        let rows_after_second = db.list_managed_channels().await.unwrap();

        assert_eq!(rows_after_first.len(), rows_after_second.len());
        assert_eq!(
            rows_after_first[0].manager_channel_id,
            rows_after_second[0].manager_channel_id
        );
        assert_eq!(manager.channels.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settings_drift_is_pushed_back() {
        let (reconciler, manager, _) = make_reconciler(Settings::default()).await;
        let group = group();
        let now: DateTime<Utc> = "2025-12-02T12:00:00Z".parse().unwrap();
        let entry = matched(&group, nfl_event("1", "2025-12-02T18:00:00Z".parse().unwrap()));

        reconciler.reconcile(&[entry.clone()], now).await.unwrap();

        // Someone renames the channel downstream
        {
            let mut channels = manager.channels.lock().unwrap();
            channels[0].name = "Renamed By Hand".to_string();
        }

        let report = reconciler.reconcile(&[entry], now).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            manager.channels.lock().unwrap()[0].name,
            "New York Giants at New England Patriots"
        );
    }

    #[tokio::test]
    async fn orphans_and_duplicates_are_reported() {
        let (reconciler, manager, db) = make_reconciler(Settings::default()).await;
        let group = group();
        let now: DateTime<Utc> = "2025-12-02T12:00:00Z".parse().unwrap();
        let entry = matched(&group, nfl_event("1", "2025-12-02T18:00:00Z".parse().unwrap()));
        reconciler.reconcile(&[entry.clone()], now).await.unwrap();

        // An orphan: bound to our EPG namespace, no managed row
        manager.channels.lock().unwrap().push(ManagerChannel {
            id: 777,
            name: "Stale Event".to_string(),
            number: None,
            group: None,
            epg_channel_id: Some("nfl.sunday.999".to_string()),
        });

        // A duplicate: second row pointing at the same manager channel
        let rows = db.list_managed_channels().await.unwrap();
        let mut dup = rows[0].clone();
        dup.id = Uuid::new_v4();
        dup.channel_id = "nfl.sunday.dup".to_string();
        db.upsert_managed_channel(&dup).await.unwrap();

        let report = reconciler.reconcile(&[entry], now).await.unwrap();
        assert_eq!(report.orphans.len(), 1);
        assert!(report.orphans[0].contains("777"));
        assert_eq!(report.duplicates.len(), 1);
    }

    #[test]
    fn slug_shapes_channel_ids() {
        assert_eq!(slug("NFL Sunday"), "nfl.sunday");
        assert_eq!(slug("US | Premier League"), "us.premier.league");
        assert_eq!(slug("ufc"), "ufc");
    }
}
