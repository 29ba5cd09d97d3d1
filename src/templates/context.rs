//! The render context and variable resolution.
//!
//! Every variable is a pure function of the context. The `.next`/`.last`
//! suffixes re-aim event-derived variables at the bracketing games; team
//! stats always describe the focal team now.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::{Event, StreakKind, Team, TeamStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    Next,
    Last,
}

/// Everything variable resolution may draw from.
pub struct RenderContext<'a> {
    pub focal_team: &'a Team,
    pub focal_is_home: bool,
    pub event: &'a Event,
    pub stats: Option<&'a TeamStats>,
    pub next_event: Option<&'a Event>,
    pub last_event: Option<&'a Event>,
    pub now: DateTime<Utc>,
    pub timezone: Tz,
}

impl<'a> RenderContext<'a> {
    /// The opponent within `event`, resolved from the focal team.
    pub fn opponent(&self) -> &'a Team {
        self.opponent_in(self.event)
    }

    fn opponent_in(&self, event: &'a Event) -> &'a Team {
        event
            .opponent_of(&self.focal_team.provider_team_id)
            .unwrap_or(if self.focal_is_home {
                &event.away_team
            } else {
                &event.home_team
            })
    }

    /// Streak of the focal team, if stats carry one.
    pub fn streak(&self) -> Option<(StreakKind, u32)> {
        self.stats
            .and_then(|s| s.streak)
            .map(|s| (s.kind, s.length))
    }

    /// Stable identity for the seeded default-rule pick: the same channel
    /// and event always hash alike within a run.
    pub fn identity_key(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        self.event.provider_event_id.hash(&mut hasher);
        self.focal_team.provider_team_id.hash(&mut hasher);
        hasher.finish()
    }

    fn event_for(&self, suffix: Option<Suffix>) -> Option<&'a Event> {
        match suffix {
            None => Some(self.event),
            Some(Suffix::Next) => self.next_event,
            Some(Suffix::Last) => self.last_event,
        }
    }

    /// Resolve one variable. `None` means the placeholder has no value in
    /// this context and should render empty.
    pub fn resolve(&self, variable: &str, suffix: Option<Suffix>) -> Option<String> {
        // Stats-backed variables ignore the suffix: they describe the focal
        // team at enrichment time, not a historical snapshot
        match variable {
            "record" => return self.stats.map(|s| s.record.clone()),
            "home_record" => return self.stats.and_then(|s| s.home_record.clone()),
            "away_record" => return self.stats.and_then(|s| s.away_record.clone()),
            "conference" => return self.stats.and_then(|s| s.conference.clone()),
            "division" => return self.stats.and_then(|s| s.division.clone()),
            "streak" => return self.streak().map(|(_, length)| length.to_string()),
            "streak_kind" => {
                return self.streak().map(|(kind, _)| {
                    match kind {
                        StreakKind::Won => "W",
                        StreakKind::Lost => "L",
                    }
                    .to_string()
                })
            }
            "streak_text" => {
                return self.streak().map(|(kind, length)| match kind {
                    StreakKind::Won => format!("won {length}"),
                    StreakKind::Lost => format!("lost {length}"),
                })
            }
            "rank" => {
                return self
                    .stats
                    .map(|s| s.rank)
                    .filter(|rank| *rank > 0)
                    .map(|rank| rank.to_string())
            }
            _ => {}
        }

        let event = self.event_for(suffix)?;
        let opponent = self.opponent_in(event);
        let focal_is_home = event.home_team.provider_team_id == self.focal_team.provider_team_id;
        let local_start = event.start_time.with_timezone(&self.timezone);

        let value = match variable {
            "team" => self.focal_team.name.clone(),
            "team_short" => self.focal_team.short_name.clone(),
            "team_abbr" => self.focal_team.abbreviation.clone(),
            "opponent" => opponent.name.clone(),
            "opponent_short" => opponent.short_name.clone(),
            "opponent_abbr" => opponent.abbreviation.clone(),
            "opponent_record" => {
                if focal_is_home {
                    event.away_record.clone()?
                } else {
                    event.home_record.clone()?
                }
            }
            "home" => event.home_team.name.clone(),
            "away" => event.away_team.name.clone(),
            "matchup" => format!("{} at {}", event.away_team.name, event.home_team.name),
            "league" => event.league.clone(),
            "sport" => event.sport.to_string(),
            "venue" => event.venue.clone()?,
            "date" => local_start.format("%b %-d").to_string(),
            "day" => local_start.format("%A").to_string(),
            "time" => local_start.format("%-I:%M %p").to_string(),
            "start_time" => local_start.format("%Y-%m-%d %H:%M").to_string(),
            "spread" => event.odds.as_ref()?.spread.map(|v| format!("{v:+.1}"))?,
            "over_under" => event.odds.as_ref()?.over_under.map(|v| format!("{v:.1}"))?,
            "odds_details" => event.odds.as_ref()?.details.clone()?,
            "home_moneyline" => event
                .odds
                .as_ref()?
                .home_moneyline
                .map(|v| format!("{v:+}"))?,
            "away_moneyline" => event
                .odds
                .as_ref()?
                .away_moneyline
                .map(|v| format!("{v:+}"))?,
            "opponent_rank" => {
                let rank = if focal_is_home {
                    event.away_rank
                } else {
                    event.home_rank
                };
                rank.map(|r| r.to_string())?
            }
            "broadcast" => event.broadcasts.first().map(|b| b.name.clone())?,
            "broadcasts" => {
                if event.broadcasts.is_empty() {
                    return None;
                }
                event
                    .broadcasts
                    .iter()
                    .map(|b| b.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
            "home_score" => event.home_score.map(|s| s.to_string())?,
            "away_score" => event.away_score.map(|s| s.to_string())?,
            "score" => {
                let (home, away) = (event.home_score?, event.away_score?);
                if focal_is_home {
                    format!("{home}-{away}")
                } else {
                    format!("{away}-{home}")
                }
            }
            "result" => {
                let (home, away) = (event.home_score?, event.away_score?);
                let (ours, theirs) = if focal_is_home {
                    (home, away)
                } else {
                    (away, home)
                };
                if ours > theirs {
                    "W".to_string()
                } else if ours < theirs {
                    "L".to_string()
                } else {
                    "T".to_string()
                }
            }
            _ => return None,
        };
        Some(value)
    }
}
