//! Template rendering: `{variable[.suffix]}` substitution plus
//! priority-ordered conditional description selection.
//!
//! Unresolved placeholders render as empty strings and are reported back to
//! the caller for the run report; rendering itself never fails.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::template::DEFAULT_RULE_PRIORITY;
use crate::models::ConditionRule;

pub mod conditions;
pub mod context;

pub use context::{RenderContext, Suffix};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)(?:\.(next|last))?\}").unwrap())
}

/// Result of rendering one template string.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub text: String,
    /// Placeholder names (with suffix) that had no value
    pub unresolved: Vec<String>,
}

/// Substitute every placeholder in `template` from the context.
pub fn render(template: &str, ctx: &RenderContext<'_>) -> RenderOutput {
    let mut unresolved = Vec::new();
    let text = placeholder_re()
        .replace_all(template, |caps: &regex::Captures| {
            let variable = &caps[1];
            let suffix = caps.get(2).map(|m| match m.as_str() {
                "next" => Suffix::Next,
                _ => Suffix::Last,
            });
            match ctx.resolve(variable, suffix) {
                Some(value) => value,
                None => {
                    unresolved.push(caps[0].trim_matches(['{', '}']).to_string());
                    String::new()
                }
            }
        })
        .into_owned();

    RenderOutput { text, unresolved }
}

/// Pick the description rule for a context: ascending priority, first match
/// wins. Priority-100 rules always match; when several exist one is chosen
/// by a seeded pick so identical contexts repeat within a run but vary
/// across runs.
pub fn select_description_rule<'a>(
    rules: &'a [ConditionRule],
    ctx: &RenderContext<'_>,
    run_seed: u64,
) -> Option<&'a ConditionRule> {
    let mut ordered: Vec<&ConditionRule> = rules.iter().collect();
    ordered.sort_by_key(|rule| rule.priority);

    for rule in ordered.iter().filter(|r| !r.is_default()) {
        if let Some(condition) = &rule.condition {
            if conditions::matches(condition, ctx) {
                return Some(rule);
            }
        }
    }

    let defaults: Vec<&ConditionRule> = ordered
        .iter()
        .filter(|r| r.priority >= DEFAULT_RULE_PRIORITY)
        .copied()
        .collect();
    match defaults.len() {
        0 => None,
        1 => Some(defaults[0]),
        n => {
            let mut rng = fastrand::Rng::with_seed(run_seed ^ ctx.identity_key());
            Some(defaults[rng.usize(..n)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::context::tests::{context_with, sample_event, sample_stats};
    use super::*;
    use crate::models::Condition;
    use uuid::Uuid;

    fn rule(priority: i64, condition: Option<Condition>, template: &str) -> ConditionRule {
        ConditionRule {
            id: Uuid::new_v4(),
            condition,
            priority,
            template: template.to_string(),
        }
    }

    #[test]
    fn lower_priority_rule_wins_over_later_matches() {
        let event = sample_event();
        let stats = sample_stats();
        let ctx = context_with(&event, Some(&stats), true);

        let rules = vec![
            rule(50, Some(Condition::IsHome), "home vs {opponent}"),
            rule(10, Some(Condition::WinStreakAtLeast(5)), "streak {streak}"),
            rule(DEFAULT_RULE_PRIORITY, None, "{team} vs {opponent}"),
        ];

        let selected = select_description_rule(&rules, &ctx, 1).unwrap();
        assert_eq!(selected.template, "streak {streak}");
        let rendered = render(&selected.template, &ctx);
        assert_eq!(rendered.text, "streak 6");
        assert!(rendered.unresolved.is_empty());
    }

    #[test]
    fn default_rule_matches_when_nothing_else_does() {
        let event = sample_event();
        let ctx = context_with(&event, None, false);

        let rules = vec![
            rule(10, Some(Condition::WinStreakAtLeast(5)), "streak {streak}"),
            rule(DEFAULT_RULE_PRIORITY, None, "plain"),
        ];
        let selected = select_description_rule(&rules, &ctx, 1).unwrap();
        assert_eq!(selected.template, "plain");
    }

    #[test]
    fn multiple_defaults_pick_stably_within_a_run() {
        let event = sample_event();
        let ctx = context_with(&event, None, true);

        let rules = vec![
            rule(DEFAULT_RULE_PRIORITY, None, "default a"),
            rule(DEFAULT_RULE_PRIORITY, None, "default b"),
            rule(DEFAULT_RULE_PRIORITY, None, "default c"),
        ];

        let first = select_description_rule(&rules, &ctx, 42).unwrap();
        for _ in 0..10 {
            let again = select_description_rule(&rules, &ctx, 42).unwrap();
            assert_eq!(first.template, again.template);
        }

        // Across runs (different seed) the pick may differ; over many seeds
        // every default must be reachable
        let mut seen = std::collections::HashSet::new();
        for seed in 0..64 {
            seen.insert(
                select_description_rule(&rules, &ctx, seed)
                    .unwrap()
                    .template
                    .clone(),
            );
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn unresolved_placeholders_render_empty_and_are_reported() {
        let event = sample_event();
        let ctx = context_with(&event, None, true);

        let rendered = render("{team} spread {spread} next: {opponent.next}", &ctx);
        assert_eq!(rendered.text, "New England Patriots spread  next: ");
        assert_eq!(rendered.unresolved, vec!["spread", "opponent.next"]);
    }

    #[test]
    fn unknown_conditions_never_match() {
        let event = sample_event();
        let ctx = context_with(&event, None, true);

        // A rule whose condition failed to parse carries None and is not a
        // default; it must never be selected
        let rules = vec![
            rule(10, None, "broken"),
            rule(DEFAULT_RULE_PRIORITY, None, "fallback"),
        ];
        let selected = select_description_rule(&rules, &ctx, 1).unwrap();
        assert_eq!(selected.template, "fallback");
    }
}
