//! Condition evaluation against a render context.

use crate::models::{Condition, StreakKind};
use crate::templates::RenderContext;

/// Whether a condition holds for this context. Conditions with missing
/// inputs (no stats, no odds) simply do not match.
pub fn matches(condition: &Condition, ctx: &RenderContext<'_>) -> bool {
    let streak = ctx.streak();
    let win_streak = |n: u32| matches!(streak, Some((StreakKind::Won, len)) if len >= n);
    let loss_streak = |n: u32| matches!(streak, Some((StreakKind::Lost, len)) if len >= n);

    let opponent_rank = if ctx.focal_is_home {
        ctx.event.away_rank
    } else {
        ctx.event.home_rank
    };
    let focal_rank = if ctx.focal_is_home {
        ctx.event.home_rank
    } else {
        ctx.event.away_rank
    };

    match condition {
        Condition::IsHome => ctx.focal_is_home,
        Condition::IsAway => !ctx.focal_is_home,
        Condition::WinStreakAtLeast(n) => win_streak(*n),
        Condition::LossStreakAtLeast(n) => loss_streak(*n),
        Condition::HomeWinStreakAtLeast(n) => ctx.focal_is_home && win_streak(*n),
        Condition::HomeLossStreakAtLeast(n) => ctx.focal_is_home && loss_streak(*n),
        Condition::AwayWinStreakAtLeast(n) => !ctx.focal_is_home && win_streak(*n),
        Condition::AwayLossStreakAtLeast(n) => !ctx.focal_is_home && loss_streak(*n),
        Condition::IsPlayoff => {
            ctx.event.season_type == Some(crate::models::SeasonType::Postseason)
        }
        Condition::IsPreseason => {
            ctx.event.season_type == Some(crate::models::SeasonType::Preseason)
        }
        Condition::HasOdds => ctx.event.odds.is_some(),
        Condition::IsRankedOpponent => {
            matches!(opponent_rank, Some(rank) if (1..=25).contains(&rank))
        }
        Condition::IsTopTenMatchup => {
            matches!(focal_rank, Some(rank) if (1..=10).contains(&rank))
                && matches!(opponent_rank, Some(rank) if (1..=10).contains(&rank))
        }
        Condition::OpponentNameContains(text) => {
            let needle = text.to_lowercase();
            let opponent = ctx.opponent();
            opponent.name.to_lowercase().contains(&needle)
                || opponent.short_name.to_lowercase().contains(&needle)
        }
        Condition::IsNationalBroadcast => ctx.event.broadcasts.iter().any(|b| b.is_national),
        Condition::IsConferenceGame => ctx.event.conference_game == Some(true),
    }
}
