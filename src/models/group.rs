//! User-owned channel configuration: event groups and team channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How to handle multiple streams resolving to the same event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "duplicate_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DuplicateMode {
    /// One channel per event, first stream wins
    Consolidate,
    /// One channel per stream
    Separate,
    /// Drop duplicate streams beyond the first, without consolidating names
    Ignore,
}

/// A named cluster of upstream streams driven through the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventGroup {
    pub id: Uuid,
    pub name: String,
    /// M3U group name in the external manager this group pulls streams from
    pub m3u_group: String,
    /// League slugs or pseudo-selectors (`soccer_all`); empty means "infer
    /// candidate leagues from team names"
    pub league_selectors: Vec<String>,
    pub include_regex: Option<String>,
    pub exclude_regex: Option<String>,
    pub duplicate_mode: DuplicateMode,
    /// Match events already final (off by default)
    pub include_final: bool,
    pub template_id: Option<Uuid>,
    /// Channel group assigned in the manager for created channels
    pub channel_group: Option<String>,
    /// First channel number handed to the manager; subsequent channels count up
    pub channel_start_number: Option<i64>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A keyword that carves matching streams out of normal duplicate handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionKeyword {
    pub id: Uuid,
    pub group_id: Uuid,
    pub keyword: String,
    /// true: always a separate channel; false: sub-consolidated under one
    /// keyword channel
    pub separate: bool,
}

/// A dedicated channel following one team's schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamChannelConfig {
    pub id: Uuid,
    pub provider: String,
    pub provider_team_id: String,
    pub league: String,
    /// XMLTV channel id
    pub channel_id: String,
    pub display_name: String,
    pub logo_url: Option<String>,
    pub template_id: Option<Uuid>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A raw stream as listed by the external manager for an M3U group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStream {
    /// The event group this stream was pulled for
    pub group_id: Uuid,
    /// Stream identity within the manager
    pub stream_id: String,
    /// Displayed name; the only part of identity that matching depends on
    pub name: String,
}
