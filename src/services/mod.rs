pub mod sports_data;
pub mod team_league_cache;

pub use sports_data::SportsDataService;
pub use team_league_cache::{TeamLeagueCache, TeamLeagueIndex};
