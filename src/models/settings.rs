//! Generation tuning settings. A singleton row in the database, user-owned.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Sport;

/// When the reconciler creates a downstream channel, relative to the event's
/// start in the display timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "create_timing", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreateTiming {
    DayOf,
    DayBefore,
    TwoDaysBefore,
    WeekBefore,
}

impl CreateTiming {
    pub fn lead_days(&self) -> i64 {
        match self {
            CreateTiming::DayOf => 0,
            CreateTiming::DayBefore => 1,
            CreateTiming::TwoDaysBefore => 2,
            CreateTiming::WeekBefore => 7,
        }
    }
}

/// When a managed channel becomes eligible for deletion after its event ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delete_timing", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeleteTiming {
    /// Delete as soon as the stream disappears and the event has ended
    StreamRemoved,
    /// 23:59:59 local of the day the event ends
    EndOfDay,
    EndOfNextDay,
    /// Never deleted automatically
    Manual,
}

/// Behavior when a game crosses midnight into a day with no game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "midnight_crossover_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MidnightCrossoverMode {
    Postgame,
    Idle,
}

/// Generation tuning. Defaults match the documented option set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Days of EPG to emit
    pub epg_output_days_ahead: i64,
    /// Fetch horizon for team schedules
    pub team_schedule_days_ahead: i64,
    /// Matching horizon for event groups
    pub event_match_days_ahead: i64,
    /// Keep in-progress games this many hours back
    pub epg_lookback_hours: i64,
    /// Display timezone (IANA name)
    pub epg_timezone: String,
    /// Per-sport duration overrides in hours, keyed by sport slug
    pub duration_overrides: BTreeMap<String, f64>,
    pub midnight_crossover_mode: MidnightCrossoverMode,
    /// Filler programmes longer than this are split at the next grid boundary
    pub max_program_hours: f64,
    /// Hours of postgame filler before switching to pregame
    pub postgame_max_hours: f64,
    /// Prelims length for split-card events
    pub prelims_duration_hours: f64,
    pub channel_create_timing: CreateTiming,
    pub channel_delete_timing: DeleteTiming,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            epg_output_days_ahead: 14,
            team_schedule_days_ahead: 30,
            event_match_days_ahead: 7,
            epg_lookback_hours: 6,
            epg_timezone: "UTC".to_string(),
            duration_overrides: BTreeMap::new(),
            midnight_crossover_mode: MidnightCrossoverMode::Postgame,
            max_program_hours: 6.0,
            postgame_max_hours: 6.0,
            prelims_duration_hours: 3.0,
            channel_create_timing: CreateTiming::DayOf,
            channel_delete_timing: DeleteTiming::EndOfDay,
        }
    }
}

impl Settings {
    /// Effective duration for a sport, before any template override.
    pub fn duration_hours(&self, sport: Sport) -> f64 {
        self.duration_overrides
            .get(sport.as_str())
            .copied()
            .unwrap_or_else(|| sport.default_duration_hours())
    }

    /// Resolved display timezone; fails on unknown IANA names.
    pub fn timezone(&self) -> Result<chrono_tz::Tz, crate::errors::AppError> {
        self.epg_timezone.parse::<chrono_tz::Tz>().map_err(|_| {
            crate::errors::AppError::configuration(format!(
                "unknown timezone '{}'",
                self.epg_timezone
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_override_beats_sport_default() {
        let mut settings = Settings::default();
        assert_eq!(settings.duration_hours(Sport::Basketball), 3.0);
        settings
            .duration_overrides
            .insert("basketball".to_string(), 2.75);
        assert_eq!(settings.duration_hours(Sport::Basketball), 2.75);
    }

    #[test]
    fn timezone_resolution() {
        let mut settings = Settings::default();
        assert!(settings.timezone().is_ok());
        settings.epg_timezone = "America/New_York".to_string();
        assert!(settings.timezone().is_ok());
        settings.epg_timezone = "Mars/Olympus_Mons".to_string();
        assert!(settings.timezone().is_err());
    }

    #[test]
    fn create_timing_lead_days() {
        assert_eq!(CreateTiming::DayOf.lead_days(), 0);
        assert_eq!(CreateTiming::WeekBefore.lead_days(), 7);
    }
}
