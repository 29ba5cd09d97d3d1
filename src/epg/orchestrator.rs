//! The EPG generation pipeline.
//!
//! One run walks four phases: team-based EPG, event-based EPG (streams →
//! matcher → enrichment), channel lifecycle, and persistence/reporting.
//! Work fans out per team channel but results are collected and sorted
//! before emission, so equal inputs produce byte-identical XMLTV. At most
//! one run is in flight process-wide; a cross-process abort flag is polled
//! at item boundaries.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::database::Database;
use crate::epg::filler::{plan_filler, FillerSpan};
use crate::epg::progress::{Phase, ProgressBus};
use crate::epg::xmltv;
use crate::errors::{AppError, ProviderError};
use crate::lifecycle::{slug, ChannelReconciler, MatchedEvent};
use crate::manager::ManagerApi;
use crate::matcher::{MatchContext, StreamMatcher};
use crate::models::{
    CardSegment, ChannelBlock, Event, EventGroup, EventStatus, ExceptionKeyword, FillerKind,
    MatchOutcome, Programme, RawStream, RunCounters, RunRecord, RunStatus, Settings,
    TeamChannelConfig, TemplateConfig,
};
use crate::services::{SportsDataService, TeamLeagueCache};
use crate::templates::{self, RenderContext};
use crate::utils::datetime::last_top_of_hour;

/// Parallelism for per-team schedule fetching.
const TEAM_FANOUT: usize = 4;
const ABORT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

pub struct EpgOrchestrator {
    db: Database,
    data: Arc<SportsDataService>,
    team_cache: Arc<TeamLeagueCache>,
    manager: Option<Arc<dyn ManagerApi>>,
    output_path: PathBuf,
    region_tokens: Vec<String>,
    progress: ProgressBus,
    running: Arc<AtomicBool>,
}

/// Clears the single-run flag when a run ends, however it ends.
struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, AppError> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::AlreadyRunning);
        }
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// What one team channel contributes to the document.
struct ChannelOutput {
    block: ChannelBlock,
    programmes: Vec<Programme>,
    issues: Vec<String>,
    events: i64,
    unresolved: i64,
}

impl EpgOrchestrator {
    pub fn new(
        db: Database,
        data: Arc<SportsDataService>,
        team_cache: Arc<TeamLeagueCache>,
        manager: Option<Arc<dyn ManagerApi>>,
        output_path: PathBuf,
        region_tokens: Vec<String>,
    ) -> Self {
        Self {
            db,
            data,
            team_cache,
            manager,
            output_path,
            region_tokens,
            progress: ProgressBus::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn progress(&self) -> &ProgressBus {
        &self.progress
    }

    /// Run one generation. Returns the run record for success, abort, and
    /// failure alike; `Err` is reserved for states where no record could be
    /// produced (`AlreadyRunning`, misconfiguration, storage loss).
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunRecord, AppError> {
        let _guard = RunGuard::acquire(&self.running)?;

        // Incrementing the generation is the first act of a run; cache aging
        // and fingerprint bookkeeping key off it
        let generation = self.db.next_generation().await.map_err(store_err)?;

        let settings = self.db.get_settings().await.map_err(store_err)?;
        let tz = settings.timezone()?;

        self.db.clear_abort().await.map_err(store_err)?;
        self.data.reset_provider_stats();
        self.data.set_generation(generation);
        info!("Starting EPG generation {}", generation);

        // Cross-process abort: poll the flag, trip the token
        let poller_stop = CancellationToken::new();
        {
            let stop = poller_stop.clone();
            let cancel = cancel.clone();
            let db = self.db.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(ABORT_POLL_INTERVAL) => {
                            if db.is_abort_requested().await.unwrap_or(false) {
                                info!("Abort requested, cancelling run");
                                cancel.cancel();
                                return;
                            }
                        }
                    }
                }
            });
        }

        let started_at = Utc::now();
        let mut counters = RunCounters::default();
        let mut issues = Vec::new();

        let outcome = self
            .execute(&settings, tz, generation, &mut counters, &mut issues, &cancel)
            .await;
        poller_stop.cancel();

        let status = match &outcome {
            Ok(()) => RunStatus::Success,
            Err(AppError::Canceled) | Err(AppError::Provider(ProviderError::Canceled)) => {
                RunStatus::Aborted
            }
            Err(e) => {
                issues.push(format!("generation failed: {e}"));
                RunStatus::Failed
            }
        };

        let record = RunRecord {
            generation,
            status,
            started_at,
            finished_at: Utc::now(),
            counters,
            issues,
        };
        self.db.insert_run_record(&record).await.map_err(store_err)?;
        self.db.clear_abort().await.map_err(store_err)?;

        for stats in self.data.provider_stats() {
            info!(
                provider = %stats.provider,
                requests = stats.requests,
                retries = stats.retries,
                preemptive_waits = stats.preemptive_waits,
                rate_limit_waits = stats.rate_limit_waits,
                failures = stats.failures,
                "Provider usage for generation"
            );
        }

        let final_phase = match status {
            RunStatus::Aborted => Phase::Aborted,
            _ => Phase::Done,
        };
        self.progress.emit(final_phase, 1, 1, status_label(status));
        info!("Generation {} finished: {:?}", generation, status);
        Ok(record)
    }

    async fn execute(
        &self,
        settings: &Settings,
        tz: Tz,
        generation: i64,
        counters: &mut RunCounters,
        issues: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let mut channels: Vec<ChannelBlock> = Vec::new();
        let mut programmes: Vec<Programme> = Vec::new();

        // Phase 1: team-based EPG
        let team_channels = self.db.list_enabled_team_channels().await.map_err(store_err)?;
        let total = team_channels.len();
        self.progress.emit(Phase::TeamEpg, 0, total, "");

        let mut outputs: Vec<ChannelOutput> = Vec::new();
        let mut completed = 0usize;
        let mut team_stream = stream::iter(team_channels.into_iter().map(|channel| {
            let label = channel.channel_id.clone();
            async move {
                let result = self
                    .build_team_channel(&channel, settings, tz, generation, now, cancel)
                    .await;
                (label, result)
            }
        }))
        .buffer_unordered(TEAM_FANOUT);

        while let Some((label, result)) = team_stream.next().await {
            ensure_active(cancel)?;
            completed += 1;
            self.progress.emit(Phase::TeamEpg, completed, total, label);
            match result {
                Ok(output) => outputs.push(output),
                Err(e) if is_cancel(&e) => return Err(AppError::Canceled),
                Err(e) => issues.push(e.to_string()),
            }
        }
        drop(team_stream);

        outputs.sort_by(|a, b| a.block.id.cmp(&b.block.id));
        for output in outputs {
            counters.events_processed += output.events;
            counters.unresolved_variables += output.unresolved;
            issues.extend(output.issues);
            channels.push(output.block);
            programmes.extend(output.programmes);
        }

        // Phase 2: event-based EPG
        let groups = self.db.list_enabled_event_groups().await.map_err(store_err)?;
        let total = groups.len();
        self.progress.emit(Phase::EventEpg, 0, total, "");

        let mut matched_events: Vec<MatchedEvent> = Vec::new();
        if !groups.is_empty() && self.manager.is_none() {
            issues.push("event groups configured but no IPTV manager connection".to_string());
        } else {
            let index = self.team_cache.snapshot();
            let aliases = self.db.load_alias_map().await.map_err(store_err)?;
            let matcher = StreamMatcher::new(
                self.data.clone(),
                index,
                self.db.clone(),
                aliases,
                self.region_tokens.clone(),
            );

            for (position, group) in groups.iter().enumerate() {
                ensure_active(cancel)?;
                self.progress
                    .emit(Phase::EventEpg, position, total, group.name.clone());
                match self
                    .build_event_group(
                        group, &matcher, settings, tz, generation, now, counters, issues, cancel,
                    )
                    .await
                {
                    Ok((group_channels, group_programmes, group_matches)) => {
                        channels.extend(group_channels);
                        programmes.extend(group_programmes);
                        matched_events.extend(group_matches);
                    }
                    Err(e) if is_cancel(&e) => return Err(AppError::Canceled),
                    Err(e) => issues.push(format!("group '{}' skipped: {e}", group.name)),
                }
            }
            self.progress.emit(Phase::EventEpg, total, total, "");
        }

        // Phase 3: channel lifecycle
        ensure_active(cancel)?;
        self.progress.emit(Phase::Lifecycle, 0, 1, "");
        if let Some(manager) = &self.manager {
            let reconciler = ChannelReconciler::new(
                self.db.clone(),
                manager.clone(),
                settings.clone(),
                tz,
            );
            let report = reconciler.reconcile(&matched_events, now).await?;
            counters.channels_created += report.created;
            counters.channels_deleted += report.deleted;
            for orphan in report.orphans {
                issues.push(format!("orphan downstream channel: {orphan}"));
            }
            for duplicate in report.duplicates {
                issues.push(format!("duplicate managed channel: {duplicate}"));
            }
            issues.extend(report.issues);
        }
        self.progress.emit(Phase::Lifecycle, 1, 1, "");

        // Phase 4: persistence and reporting
        ensure_active(cancel)?;
        self.progress.emit(Phase::Persist, 0, 2, "writing xmltv");
        xmltv::sanitize_channel_programmes(&mut programmes);
        counters.programmes_emitted = programmes.len() as i64;
        let bytes = xmltv::write_document(&self.output_path, &channels, &programmes).await?;
        info!(
            "Wrote {} programmes across {} channels ({} bytes) to {}",
            programmes.len(),
            channels.len(),
            bytes,
            self.output_path.display()
        );

        self.progress.emit(Phase::Persist, 1, 2, "purging match cache");
        let purged = self
            .db
            .purge_stale_match_cache(generation)
            .await
            .map_err(store_err)?;
        if purged > 0 {
            info!("Purged {} stale match cache entries", purged);
        }
        self.progress.emit(Phase::Persist, 2, 2, "");

        Ok(())
    }

    /// Phase-1 worker: one team channel's window, programmes, and filler.
    async fn build_team_channel(
        &self,
        channel: &TeamChannelConfig,
        settings: &Settings,
        tz: Tz,
        generation: i64,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ChannelOutput, AppError> {
        ensure_active(cancel)?;

        let template = self
            .db
            .template_or_fallback(channel.template_id)
            .await
            .map_err(store_err)?;

        let schedule = match self
            .data
            .team_schedule(
                &channel.provider_team_id,
                &channel.league,
                settings.team_schedule_days_ahead,
                cancel,
            )
            .await
        {
            Ok(schedule) => schedule,
            Err(ProviderError::Canceled) => return Err(AppError::Canceled),
            Err(e) => {
                return Err(AppError::internal(format!(
                    "team channel '{}' skipped: {e}",
                    channel.channel_id
                )))
            }
        };

        let mut events: Vec<Event> = schedule.as_ref().clone();
        events.sort_by_key(|e| e.start_time);

        let duration = effective_duration(&template, settings, &events);
        let (window_start, window_end) = epg_window(&events, duration, now, settings);
        let window_events: Vec<Event> = events
            .iter()
            .filter(|e| e.start_time >= window_start && e.start_time <= window_end)
            .filter(|e| !matches!(e.status, EventStatus::Canceled))
            .cloned()
            .collect();

        let stats = match self
            .data
            .team_stats(&channel.provider_team_id, &channel.league, cancel)
            .await
        {
            Ok(stats) => stats,
            Err(ProviderError::Canceled) => return Err(AppError::Canceled),
            Err(e) => {
                warn!(
                    "Stats unavailable for '{}': {e}; rendering without",
                    channel.channel_id
                );
                None
            }
        };

        let mut output = ChannelOutput {
            block: ChannelBlock {
                id: channel.channel_id.clone(),
                display_name: channel.display_name.clone(),
                icon: channel.logo_url.clone(),
            },
            programmes: Vec::new(),
            issues: Vec::new(),
            events: window_events.len() as i64,
            unresolved: 0,
        };

        let mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
        for (position, event) in window_events.iter().enumerate() {
            let stop = event.start_time + hours(duration);
            spans.push((event.start_time, stop));

            let ctx = RenderContext {
                focal_team: focal_team(event, &channel.provider_team_id),
                focal_is_home: event.home_team.provider_team_id == channel.provider_team_id,
                event,
                stats: stats.as_deref(),
                next_event: window_events.get(position + 1),
                last_event: position.checked_sub(1).map(|p| &window_events[p]),
                now,
                timezone: tz,
            };

            let programme = self.render_game_programme(
                &template,
                &ctx,
                &channel.channel_id,
                event,
                stop,
                generation,
                &mut output.unresolved,
            );
            output.programmes.push(programme);
        }

        // Filler between and around games
        let filler_spans = plan_filler(
            &spans,
            window_start,
            window_end,
            settings,
            &template.filler,
            tz,
        );
        for span in filler_spans {
            if let Some(programme) = self.render_filler_programme(
                &template,
                &span,
                &window_events,
                &channel.channel_id,
                &channel.provider_team_id,
                stats.as_deref(),
                now,
                tz,
                &mut output.unresolved,
            ) {
                output.programmes.push(programme);
            }
        }

        Ok(output)
    }

    /// Phase-2 worker: one event group's streams through the matcher.
    #[allow(clippy::too_many_arguments)]
    async fn build_event_group(
        &self,
        group: &EventGroup,
        matcher: &StreamMatcher,
        settings: &Settings,
        tz: Tz,
        generation: i64,
        now: DateTime<Utc>,
        counters: &mut RunCounters,
        issues: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ChannelBlock>, Vec<Programme>, Vec<MatchedEvent>), AppError> {
        let manager = self
            .manager
            .as_ref()
            .expect("event groups require a manager");

        let streams = manager
            .list_streams(&group.m3u_group)
            .await
            .map_err(AppError::Manager)?;

        let include = compile_regex(group.include_regex.as_deref())
            .map_err(|e| AppError::configuration(format!("include_regex: {e}")))?;
        let exclude = compile_regex(group.exclude_regex.as_deref())
            .map_err(|e| AppError::configuration(format!("exclude_regex: {e}")))?;
        let keywords = self
            .db
            .list_exception_keywords(group.id)
            .await
            .map_err(store_err)?;
        let template = self
            .db
            .template_or_fallback(group.template_id)
            .await
            .map_err(store_err)?;

        let ctx = MatchContext {
            group,
            generation,
            now,
            timezone: tz,
            days_ahead: settings.event_match_days_ahead,
        };

        let mut matched: Vec<(RawStream, crate::models::EventMatch)> = Vec::new();
        for stream in streams {
            ensure_active(cancel)?;
            if let Some(include) = &include {
                if !include.is_match(&stream.name) {
                    continue;
                }
            }
            if let Some(exclude) = &exclude {
                if exclude.is_match(&stream.name) {
                    continue;
                }
            }

            let raw = RawStream {
                group_id: group.id,
                stream_id: stream.id.clone(),
                name: stream.name.clone(),
            };
            match matcher.match_stream(&raw, &ctx, cancel).await? {
                MatchOutcome::Match(event_match) => {
                    counters.streams_matched += 1;
                    matched.push((raw, event_match));
                }
                MatchOutcome::NoMatch(reason) => {
                    counters.streams_unmatched += 1;
                    issues.push(format!("stream '{}' unmatched: {reason}", stream.name));
                }
            }
        }

        let assignments = assign_channels(group, &keywords, matched);

        let mut channels = Vec::new();
        let mut programmes = Vec::new();
        let mut matches = Vec::new();

        for assignment in assignments {
            ensure_active(cancel)?;
            let event = match self
                .data
                .event(&assignment.event_id, &assignment.league, cancel)
                .await
            {
                Ok(Some(event)) => event,
                Ok(None) => {
                    issues.push(format!(
                        "event {} vanished upstream; channel '{}' skipped",
                        assignment.event_id, assignment.channel_id
                    ));
                    continue;
                }
                Err(ProviderError::Canceled) => return Err(AppError::Canceled),
                Err(e) => {
                    issues.push(format!(
                        "enrichment failed for event {}: {e}",
                        assignment.event_id
                    ));
                    continue;
                }
            };
            counters.events_processed += 1;

            let (start, stop) =
                programme_bounds(&event, assignment.card_segment, &template, settings);
            let channel_name = event
                .short_name
                .clone()
                .unwrap_or_else(|| {
                    format!("{} at {}", event.away_team.name, event.home_team.name)
                });

            let ctx = RenderContext {
                focal_team: &event.home_team,
                focal_is_home: true,
                event: &event,
                stats: None,
                next_event: None,
                last_event: None,
                now,
                timezone: tz,
            };

            let mut unresolved = 0;
            let mut programme = self.render_game_programme(
                &template,
                &ctx,
                &assignment.channel_id,
                &event,
                stop,
                generation,
                &mut unresolved,
            );
            programme.start = start;
            counters.unresolved_variables += unresolved;

            channels.push(ChannelBlock {
                id: assignment.channel_id.clone(),
                display_name: channel_name.clone(),
                icon: event.home_team.logo_url.clone(),
            });

            // Optional bracketing filler around the single game programme
            let filler_spans = plan_filler(
                &[(start, stop)],
                last_top_of_hour(now.min(start)),
                stop + hours(settings.postgame_max_hours),
                settings,
                &template.filler,
                tz,
            );
            for span in filler_spans {
                let keep = match span.kind {
                    FillerKind::Pregame => span.next.is_some(),
                    FillerKind::Postgame => span.prev.is_some(),
                    FillerKind::Idle => false,
                };
                if !keep {
                    continue;
                }
                let slot = template.filler.slot(span.kind);
                let mut span_unresolved = 0;
                let span_ctx = RenderContext {
                    focal_team: &event.home_team,
                    focal_is_home: true,
                    event: &event,
                    stats: None,
                    next_event: span.next.map(|_| &*event),
                    last_event: span.prev.map(|_| &*event),
                    now,
                    timezone: tz,
                };
                let title = render_counted(&slot.title_template, &span_ctx, &mut span_unresolved);
                let description =
                    render_counted(&slot.description_template, &span_ctx, &mut span_unresolved);
                counters.unresolved_variables += span_unresolved;
                programmes.push(Programme {
                    channel_id: assignment.channel_id.clone(),
                    start: span.start,
                    stop: span.stop,
                    title,
                    subtitle: None,
                    description,
                    categories: template.categories.clone(),
                    live: false,
                    new: false,
                    filler: Some(span.kind),
                });
            }

            programmes.push(programme);
            matches.push(MatchedEvent {
                group: group.clone(),
                channel_id: assignment.channel_id,
                channel_name,
                stream_id: assignment.stream_id,
                event: event.as_ref().clone(),
            });
        }

        Ok((channels, programmes, matches))
    }

    #[allow(clippy::too_many_arguments)]
    fn render_game_programme(
        &self,
        template: &TemplateConfig,
        ctx: &RenderContext<'_>,
        channel_id: &str,
        event: &Event,
        stop: DateTime<Utc>,
        generation: i64,
        unresolved: &mut i64,
    ) -> Programme {
        let title = render_counted(&template.title_template, ctx, unresolved);
        let subtitle = template
            .subtitle_template
            .as_deref()
            .map(|t| render_counted(t, ctx, unresolved))
            .filter(|s| !s.is_empty());
        let description = templates::select_description_rule(
            &template.description_rules,
            ctx,
            generation as u64,
        )
        .map(|rule| render_counted(&rule.template, ctx, unresolved))
        .unwrap_or_default();

        Programme {
            channel_id: channel_id.to_string(),
            start: event.start_time,
            stop,
            title,
            subtitle,
            description,
            categories: template.categories.clone(),
            live: event.status == EventStatus::InProgress,
            new: event.status == EventStatus::Scheduled,
            filler: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_filler_programme(
        &self,
        template: &TemplateConfig,
        span: &FillerSpan,
        window_events: &[Event],
        channel_id: &str,
        focal_team_id: &str,
        stats: Option<&crate::models::TeamStats>,
        now: DateTime<Utc>,
        tz: Tz,
        unresolved: &mut i64,
    ) -> Option<Programme> {
        let anchor_index = span.next.or(span.prev)?;
        let anchor = window_events.get(anchor_index)?;
        let slot = template.filler.slot(span.kind);

        let ctx = RenderContext {
            focal_team: focal_team(anchor, focal_team_id),
            focal_is_home: anchor.home_team.provider_team_id == focal_team_id,
            event: anchor,
            stats,
            next_event: span.next.and_then(|i| window_events.get(i)),
            last_event: span.prev.and_then(|i| window_events.get(i)),
            now,
            timezone: tz,
        };

        let title = render_counted(&slot.title_template, &ctx, unresolved);
        let description = render_counted(&slot.description_template, &ctx, unresolved);

        Some(Programme {
            channel_id: channel_id.to_string(),
            start: span.start,
            stop: span.stop,
            title,
            subtitle: None,
            description,
            categories: template.categories.clone(),
            live: false,
            new: false,
            filler: Some(span.kind),
        })
    }
}

fn render_counted(template: &str, ctx: &RenderContext<'_>, unresolved: &mut i64) -> String {
    let output = templates::render(template, ctx);
    *unresolved += output.unresolved.len() as i64;
    output.text
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => "success",
        RunStatus::Aborted => "aborted",
        RunStatus::Failed => "failed",
    }
}

fn store_err(e: anyhow::Error) -> AppError {
    AppError::internal(format!("store access: {e}"))
}

fn is_cancel(e: &AppError) -> bool {
    matches!(
        e,
        AppError::Canceled | AppError::Provider(ProviderError::Canceled)
    )
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        Err(AppError::Canceled)
    } else {
        Ok(())
    }
}

fn hours(value: f64) -> chrono::Duration {
    chrono::Duration::seconds((value * 3600.0) as i64)
}

fn compile_regex(pattern: Option<&str>) -> Result<Option<regex::Regex>, regex::Error> {
    pattern
        .filter(|p| !p.trim().is_empty())
        .map(regex::Regex::new)
        .transpose()
}

fn focal_team<'a>(event: &'a Event, provider_team_id: &str) -> &'a crate::models::Team {
    if event.away_team.provider_team_id == provider_team_id {
        &event.away_team
    } else {
        &event.home_team
    }
}

/// Duration in hours for this channel's programmes.
fn effective_duration(template: &TemplateConfig, settings: &Settings, events: &[Event]) -> f64 {
    if let Some(hours) = template.duration_hours {
        return hours;
    }
    events
        .first()
        .map(|e| settings.duration_hours(e.sport))
        .unwrap_or(3.5)
}

/// The EPG output window: starts at the most recent game still inside its
/// duration (keeping in-progress games) or at the last top-of-hour, and
/// runs `epg_output_days_ahead` forward.
fn epg_window(
    events: &[Event],
    duration_hours: f64,
    now: DateTime<Utc>,
    settings: &Settings,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let lookback = now - Duration::hours(settings.epg_lookback_hours);
    let in_progress_start = events
        .iter()
        .filter(|e| e.start_time >= lookback && e.start_time <= now)
        .filter(|e| e.start_time + hours(duration_hours) > now)
        .map(|e| e.start_time)
        .min();

    let start = in_progress_start.unwrap_or_else(|| last_top_of_hour(now));
    // Hour-aligned end keeps warm regenerations byte-identical
    let end = last_top_of_hour(now) + Duration::days(settings.epg_output_days_ahead);
    (start, end)
}

/// One channel-worth of matched stream after duplicate handling.
struct ChannelAssignment {
    channel_id: String,
    event_id: String,
    league: String,
    stream_id: String,
    card_segment: Option<CardSegment>,
}

/// Apply exception keywords and the group's duplicate mode, then hand out
/// deterministic channel ids.
fn assign_channels(
    group: &EventGroup,
    keywords: &[ExceptionKeyword],
    matched: Vec<(RawStream, crate::models::EventMatch)>,
) -> Vec<ChannelAssignment> {
    let base = slug(&group.name);
    let mut assignments: Vec<ChannelAssignment> = Vec::new();
    let mut per_event: HashMap<String, usize> = HashMap::new();
    let mut keyword_channels: HashMap<(String, String), ()> = HashMap::new();

    // Deterministic processing order regardless of manager ordering
    let mut matched = matched;
    matched.sort_by(|a, b| a.0.stream_id.cmp(&b.0.stream_id));

    for (stream, event_match) in matched {
        let lowered = stream.name.to_lowercase();
        let keyword = keywords
            .iter()
            .find(|k| lowered.contains(&k.keyword.to_lowercase()));

        let channel_id = match keyword {
            Some(keyword) if keyword.separate => {
                // Always its own channel
                format!(
                    "{base}.{}.{}",
                    event_match.event_id,
                    slug(&keyword.keyword)
                ) + &format!(".{}", stream.stream_id)
            }
            Some(keyword) => {
                // Sub-consolidated: one channel per (event, keyword)
                let key = (event_match.event_id.clone(), keyword.keyword.clone());
                if keyword_channels.contains_key(&key) {
                    continue;
                }
                keyword_channels.insert(key, ());
                format!(
                    "{base}.{}.{}",
                    event_match.event_id,
                    slug(&keyword.keyword)
                )
            }
            None => {
                let seen = per_event.entry(event_match.event_id.clone()).or_insert(0);
                *seen += 1;
                match group.duplicate_mode {
                    crate::models::DuplicateMode::Separate => {
                        if *seen == 1 {
                            format!("{base}.{}", event_match.event_id)
                        } else {
                            format!("{base}.{}.{}", event_match.event_id, *seen)
                        }
                    }
                    // Consolidate and Ignore both keep only the first stream
                    _ => {
                        if *seen > 1 {
                            continue;
                        }
                        format!("{base}.{}", event_match.event_id)
                    }
                }
            }
        };

        assignments.push(ChannelAssignment {
            channel_id,
            event_id: event_match.event_id,
            league: event_match.league,
            stream_id: stream.stream_id,
            card_segment: event_match.card_segment,
        });
    }

    assignments.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
    assignments
}

/// Programme bounds for an event, honoring split-card segments.
fn programme_bounds(
    event: &Event,
    segment: Option<CardSegment>,
    template: &TemplateConfig,
    settings: &Settings,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let duration = template
        .duration_hours
        .unwrap_or_else(|| settings.duration_hours(event.sport));
    let main_card_start = event
        .main_card_start
        .unwrap_or(event.start_time + hours(settings.prelims_duration_hours));

    match segment {
        Some(CardSegment::Prelims) => (event.start_time, main_card_start),
        Some(CardSegment::MainCard) => (main_card_start, main_card_start + hours(duration)),
        None => (event.start_time, event.start_time + hours(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DuplicateMode, EventMatch};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn event_at(start: DateTime<Utc>) -> Event {
        crate::testing_utils::nfl_event("1", start)
    }

    #[test]
    fn window_anchors_on_in_progress_game() {
        let settings = Settings::default();
        let now = utc(2025, 12, 15, 2); // 02:00, game started at 00:00 runs 3.5h
        let events = vec![event_at(utc(2025, 12, 15, 0))];

        let (start, end) = epg_window(&events, 3.5, now, &settings);
        assert_eq!(start, utc(2025, 12, 15, 0));
        assert_eq!(end, utc(2025, 12, 29, 2));
    }

    #[test]
    fn window_falls_back_to_top_of_hour() {
        let settings = Settings::default();
        let now = Utc.with_ymd_and_hms(2025, 12, 15, 9, 47, 11).unwrap();
        // Game ended hours ago
        let events = vec![event_at(utc(2025, 12, 15, 0))];

        let (start, _) = epg_window(&events, 3.5, now, &settings);
        assert_eq!(start, utc(2025, 12, 15, 9));
    }

    #[test]
    fn window_ignores_games_past_lookback() {
        let mut settings = Settings::default();
        settings.epg_lookback_hours = 2;
        let now = utc(2025, 12, 15, 3);
        // Started 3h ago; would still be "in progress" at 3.5h duration, but
        // the lookback horizon is 2h
        let events = vec![event_at(utc(2025, 12, 15, 0))];

        let (start, _) = epg_window(&events, 3.5, now, &settings);
        assert_eq!(start, utc(2025, 12, 15, 3));
    }

    fn raw(group: Uuid, id: &str, name: &str) -> RawStream {
        RawStream {
            group_id: group,
            stream_id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn matched(event_id: &str) -> EventMatch {
        EventMatch {
            event_id: event_id.to_string(),
            league: "nfl".to_string(),
            confidence: 1.0,
            orientation_agrees: true,
            card_segment: None,
            from_cache: false,
        }
    }

    fn sample_group(mode: DuplicateMode) -> EventGroup {
        EventGroup {
            id: Uuid::new_v4(),
            name: "NFL Sunday".to_string(),
            m3u_group: "US | NFL".to_string(),
            league_selectors: vec!["nfl".to_string()],
            include_regex: None,
            exclude_regex: None,
            duplicate_mode: mode,
            include_final: false,
            template_id: None,
            channel_group: None,
            channel_start_number: None,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn consolidate_keeps_first_stream_per_event() {
        let group = sample_group(DuplicateMode::Consolidate);
        let matched = vec![
            (raw(group.id, "a", "Giants at Patriots"), matched("100")),
            (raw(group.id, "b", "Giants at Patriots HD"), matched("100")),
            (raw(group.id, "c", "Eagles at Cowboys"), matched("200")),
        ];

        let assignments = assign_channels(&group, &[], matched);
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].channel_id, "nfl.sunday.100");
        assert_eq!(assignments[0].stream_id, "a");
        assert_eq!(assignments[1].channel_id, "nfl.sunday.200");
    }

    #[test]
    fn separate_mode_fans_out_duplicates() {
        let group = sample_group(DuplicateMode::Separate);
        let matched = vec![
            (raw(group.id, "a", "Giants at Patriots"), matched("100")),
            (raw(group.id, "b", "Giants at Patriots HD"), matched("100")),
        ];

        let assignments = assign_channels(&group, &[], matched);
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].channel_id, "nfl.sunday.100");
        assert_eq!(assignments[1].channel_id, "nfl.sunday.100.2");
    }

    #[test]
    fn exception_keyword_separates_streams() {
        let group = sample_group(DuplicateMode::Consolidate);
        let keywords = vec![ExceptionKeyword {
            id: Uuid::new_v4(),
            group_id: group.id,
            keyword: "multicam".to_string(),
            separate: true,
        }];
        let matched = vec![
            (raw(group.id, "a", "Giants at Patriots"), matched("100")),
            (
                raw(group.id, "b", "Giants at Patriots MULTICAM"),
                matched("100"),
            ),
        ];

        let assignments = assign_channels(&group, &keywords, matched);
        assert_eq!(assignments.len(), 2);
        assert!(assignments
            .iter()
            .any(|a| a.channel_id.contains("multicam")));
    }

    #[test]
    fn card_segment_bounds() {
        let settings = Settings::default();
        let template = TemplateConfig::fallback();
        let mut event = crate::testing_utils::nfl_event("1", utc(2025, 11, 22, 3));
        event.sport = crate::models::Sport::Mma;
        event.main_card_start = None;

        // Prelims run from card start to the main card (3h default)
        let (start, stop) = programme_bounds(
            &event,
            Some(CardSegment::Prelims),
            &template,
            &settings,
        );
        assert_eq!(start, utc(2025, 11, 22, 3));
        assert_eq!(stop, utc(2025, 11, 22, 6));

        // Main card runs its sport duration from the main-card start
        let (start, stop) = programme_bounds(
            &event,
            Some(CardSegment::MainCard),
            &template,
            &settings,
        );
        assert_eq!(start, utc(2025, 11, 22, 6));
        assert_eq!(stop, utc(2025, 11, 22, 11));
    }

    #[test]
    fn run_guard_blocks_second_acquire() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = RunGuard::acquire(&flag).unwrap();
        assert!(matches!(
            RunGuard::acquire(&flag),
            Err(AppError::AlreadyRunning)
        ));
        drop(guard);
        assert!(RunGuard::acquire(&flag).is_ok());
    }
}
