//! Filler planning: synthetic pregame/postgame/idle spans filling the gaps
//! between game programmes, aligned to the 6-hour grid in the display
//! timezone.
//!
//! Planning is pure: it takes game intervals and returns spans tagged with
//! kind and the bracketing game indices; the orchestrator renders them
//! through the template resolver.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::models::{FillerConfig, FillerKind, MidnightCrossoverMode, Settings};
use crate::utils::datetime::{next_grid_boundary, next_local_midnight};

/// One planned filler span. `prev`/`next` index into the game list handed
/// to [`plan_filler`] and drive `.last`/`.next` template resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FillerSpan {
    pub kind: FillerKind,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Plan filler for one channel.
///
/// `games` are `[start, stop)` intervals sorted ascending and clipped to the
/// window; spans cover every gap in `[window_start, window_end)` subject to
/// the per-kind enabled flags.
pub fn plan_filler(
    games: &[(DateTime<Utc>, DateTime<Utc>)],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    settings: &Settings,
    filler: &FillerConfig,
    tz: Tz,
) -> Vec<FillerSpan> {
    let mut spans = Vec::new();
    if window_start >= window_end {
        return spans;
    }

    let mut gaps: Vec<(DateTime<Utc>, DateTime<Utc>, Option<usize>, Option<usize>)> = Vec::new();
    let mut cursor = window_start;
    for (index, (start, stop)) in games.iter().enumerate() {
        if *start > cursor {
            gaps.push((cursor, *start, index.checked_sub(1), Some(index)));
        }
        cursor = cursor.max(*stop);
    }
    if cursor < window_end {
        gaps.push((cursor, window_end, games.len().checked_sub(1), None));
    }

    for (gap_start, gap_end, prev, next) in gaps {
        plan_gap(
            &mut spans, gap_start, gap_end, prev, next, games, settings, filler, tz,
        );
    }

    spans
}

#[allow(clippy::too_many_arguments)]
fn plan_gap(
    spans: &mut Vec<FillerSpan>,
    gap_start: DateTime<Utc>,
    gap_end: DateTime<Utc>,
    prev: Option<usize>,
    next: Option<usize>,
    games: &[(DateTime<Utc>, DateTime<Utc>)],
    settings: &Settings,
    filler: &FillerConfig,
    tz: Tz,
) {
    // Postgame runs from the previous game's end, bounded by the budget;
    // in idle crossover mode it additionally stops at local midnight
    let mut postgame_end = gap_start;
    if prev.is_some() && filler.postgame.enabled {
        postgame_end = gap_end.min(gap_start + hours(settings.postgame_max_hours));
        if settings.midnight_crossover_mode == MidnightCrossoverMode::Idle {
            postgame_end = postgame_end.min(midnight_at_or_after(gap_start, tz));
        }
    }

    emit_spans(
        spans,
        gap_start,
        postgame_end,
        FillerKind::Postgame,
        prev,
        next,
        settings,
        tz,
    );

    // The remainder is pregame, except that whole game-free local days
    // render as idle when that slot is enabled
    let mut cursor = postgame_end;
    while cursor < gap_end {
        let segment_end = gap_end.min(next_local_midnight(cursor, tz));
        let kind = if filler.idle.enabled && !day_has_game(cursor, games, tz) {
            FillerKind::Idle
        } else {
            FillerKind::Pregame
        };
        emit_spans(spans, cursor, segment_end, kind, prev, next, settings, tz);
        cursor = segment_end;
    }
}

/// Split `[start, end)` at grid boundaries and the max-programme cap, then
/// push the slices. Slices for disabled kinds are dropped (intentional gap).
#[allow(clippy::too_many_arguments)]
fn emit_spans(
    spans: &mut Vec<FillerSpan>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    kind: FillerKind,
    prev: Option<usize>,
    next: Option<usize>,
    settings: &Settings,
    tz: Tz,
) {
    let mut cursor = start;
    let cap = hours(settings.max_program_hours.max(0.5));
    while cursor < end {
        let slice_end = end.min(next_grid_boundary(cursor, tz)).min(cursor + cap);
        spans.push(FillerSpan {
            kind,
            start: cursor,
            stop: slice_end,
            prev,
            next,
        });
        cursor = slice_end;
    }
}

fn hours(value: f64) -> Duration {
    Duration::seconds((value * 3600.0) as i64)
}

/// Midnight at or after `instant`: `instant` itself when it already sits on
/// the local midnight.
fn midnight_at_or_after(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = instant.with_timezone(&tz);
    if local.time() == chrono::NaiveTime::MIN {
        instant
    } else {
        next_local_midnight(instant, tz)
    }
}

fn day_has_game(
    instant: DateTime<Utc>,
    games: &[(DateTime<Utc>, DateTime<Utc>)],
    tz: Tz,
) -> bool {
    let day = instant.with_timezone(&tz).date_naive();
    games.iter().any(|(start, stop)| {
        start.with_timezone(&tz).date_naive() == day
            || (*stop - Duration::seconds(1)).with_timezone(&tz).date_naive() == day
    })
}
