//! Centralized datetime helpers: XMLTV timestamp formatting, the 6-hour
//! filler grid, and flexible parsing of provider timestamps.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Hours between filler grid boundaries (00:00/06:00/12:00/18:00 local).
pub const GRID_HOURS: u32 = 6;

/// Format an instant the way XMLTV wants it: `YYYYMMDDHHMMSS +0000` (UTC).
pub fn format_xmltv(instant: &DateTime<Utc>) -> String {
    instant.format("%Y%m%d%H%M%S +0000").to_string()
}

/// The XMLTV `<date>` tag value for a programme start.
pub fn format_xmltv_date(instant: &DateTime<Utc>) -> String {
    instant.format("%Y%m%d").to_string()
}

/// Parse timestamps as providers emit them: RFC3339 first, then the common
/// naive forms (assumed UTC).
pub fn parse_flexible(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Some feeds emit minutes-precision with a literal Z suffix
    if let Some(stripped) = trimmed.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M") {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    let naive_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    for format in &naive_formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    None
}

/// The most recent top-of-hour at or before `instant`.
pub fn last_top_of_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_minute(0)
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_nanosecond(0))
        .unwrap_or(instant)
}

/// The next 6-hour grid boundary strictly after `instant`, computed in the
/// display timezone and returned in UTC.
pub fn next_grid_boundary(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = instant.with_timezone(&tz);
    let boundary_hour = (local.hour() / GRID_HOURS + 1) * GRID_HOURS;
    let base = local
        .with_minute(0)
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_nanosecond(0))
        .unwrap_or(local);
    let next = if boundary_hour >= 24 {
        let next_day = base.date_naive() + Duration::days(1);
        match tz.from_local_datetime(&next_day.and_hms_opt(0, 0, 0).unwrap()) {
            chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => dt,
            // DST gap at midnight; fall back to a flat 6h step
            chrono::LocalResult::None => base + Duration::hours(GRID_HOURS as i64),
        }
    } else {
        base.with_hour(boundary_hour)
            .unwrap_or(base + Duration::hours(GRID_HOURS as i64))
    };
    next.with_timezone(&Utc)
}

/// The local midnight strictly after `instant`, in UTC.
pub fn next_local_midnight(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = instant.with_timezone(&tz);
    let next_day = local.date_naive() + Duration::days(1);
    let midnight = match tz.from_local_datetime(&next_day.and_hms_opt(0, 0, 0).unwrap()) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => local + Duration::hours(24),
    };
    midnight.with_timezone(&Utc)
}

/// End of the local day containing `instant` (23:59:59), in UTC.
pub fn end_of_local_day(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    next_local_midnight(instant, tz) - Duration::seconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn xmltv_format_is_utc_with_offset() {
        let dt = utc(2025, 12, 2, 1, 15);
        assert_eq!(format_xmltv(&dt), "20251202011500 +0000");
        assert_eq!(format_xmltv_date(&dt), "20251202");
    }

    #[test]
    fn parse_flexible_accepts_provider_forms() {
        assert_eq!(
            parse_flexible("2025-12-02T01:15Z"),
            Some(utc(2025, 12, 2, 1, 15))
        );
        assert_eq!(
            parse_flexible("2025-12-02T01:15:00Z"),
            Some(utc(2025, 12, 2, 1, 15))
        );
        assert_eq!(
            parse_flexible("2025-12-02 01:15:00"),
            Some(utc(2025, 12, 2, 1, 15))
        );
        assert_eq!(parse_flexible("not a date"), None);
    }

    #[test]
    fn grid_boundary_in_utc() {
        let tz = chrono_tz::UTC;
        assert_eq!(
            next_grid_boundary(utc(2025, 12, 15, 3, 0), tz),
            utc(2025, 12, 15, 6, 0)
        );
        assert_eq!(
            next_grid_boundary(utc(2025, 12, 15, 6, 0), tz),
            utc(2025, 12, 15, 12, 0)
        );
        assert_eq!(
            next_grid_boundary(utc(2025, 12, 15, 23, 30), tz),
            utc(2025, 12, 16, 0, 0)
        );
    }

    #[test]
    fn grid_boundary_respects_timezone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 03:00 UTC == 22:00 EST previous day; next boundary is local
        // midnight == 05:00 UTC
        assert_eq!(
            next_grid_boundary(utc(2025, 12, 15, 3, 0), tz),
            utc(2025, 12, 15, 5, 0)
        );
    }

    #[test]
    fn local_midnight_and_day_end() {
        let tz = chrono_tz::UTC;
        let instant = utc(2025, 12, 15, 3, 0);
        assert_eq!(next_local_midnight(instant, tz), utc(2025, 12, 16, 0, 0));
        assert_eq!(
            end_of_local_day(instant, tz),
            utc(2025, 12, 15, 23, 59) + Duration::seconds(59)
        );
    }

    #[test]
    fn top_of_hour_truncation() {
        assert_eq!(
            last_top_of_hour(utc(2025, 12, 15, 3, 47)),
            utc(2025, 12, 15, 3, 0)
        );
    }
}
