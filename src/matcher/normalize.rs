//! Stream-name normalization.
//!
//! Turns provider-decorated stream names into a flat, lowercase token string
//! plus extracted date/time/rank hints. Normalization is deterministic and
//! idempotent: re-normalizing an already-normalized name is a fixed point.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveTime};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Bracketed segments containing any of these tokens are region/provider
/// decorations and are dropped wholesale.
pub const DEFAULT_REGION_TOKENS: &[&str] = &[
    "uk", "us", "usa", "ca", "au", "de", "fr", "es", "it", "nl", "pt", "br", "mx", "ar", "sky",
    "espn", "dazn", "bein", "tsn", "fox", "nbc", "cbs", "abc", "tnt", "hd", "fhd", "uhd", "sd",
    "4k", "1080p", "720p", "hevc", "vip", "multi", "backup", "feed", "sat", "cable", "iptv",
];

/// League tokens stripped from the front of a stream name. The first one
/// stripped is kept as a routing hint.
const LEAGUE_PREFIXES: &[&str] = &[
    "nfl", "nba", "nhl", "mlb", "wnba", "mls", "ncaaf", "ncaab", "ncaa", "epl", "soccer",
    "football", "basketball", "hockey", "baseball",
];

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^)]*)\)|\[([^\]]*)\]").unwrap())
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap())
}

fn us_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2,4}))?\b").unwrap())
}

fn named_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:\s+(\d{4}))?\b")
            .unwrap()
    })
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 8:15pm / 20:15 / 8pm, with an optional trailing timezone token
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b(?:\s*(?:et|est|edt|ct|cst|cdt|mt|mst|mdt|pt|pst|pdt|gmt|utc|bst))?|\b(\d{1,2}):(\d{2})\b(?:\s*(?:et|est|edt|ct|cst|cdt|mt|mst|mdt|pt|pst|pdt|gmt|utc|bst))?")
            .unwrap()
    })
}

fn rank_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\s*(\d{1,2})\b|@\s+(\d{1,2})\b").unwrap())
}

fn channel_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)\d{1,4}\s*-\s*").unwrap())
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[|:\-#,/()\[\]]+").unwrap())
}

/// Result of stream-name normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStream {
    /// Flat lowercase token string, separators collapsed
    pub text: String,
    /// League prefix stripped from the front, if any
    pub league_hint: Option<String>,
    /// Explicit date masked out of the name
    pub date: Option<NaiveDate>,
    /// Explicit start time masked out of the name
    pub time: Option<NaiveTime>,
    /// Ranking tokens (`#8`, `@ 4`) preserved for downstream use
    pub ranks: Vec<u32>,
}

/// Unicode NFKD fold: strip combining marks, lowercase.
pub fn fold(input: &str) -> String {
    input
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Canonical form for team-name comparison: folded, punctuation collapsed.
pub fn normalize_name(input: &str) -> String {
    let folded = fold(input);
    let mut out = String::with_capacity(folded.len());
    for c in folded.chars() {
        if c.is_alphanumeric() {
            out.push(c);
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

const GENERIC_TOKENS: &[&str] = &["fc", "afc", "cf", "sc", "ac", "club", "the", "de", "st", "los", "las"];

/// Discriminative words of a team name, for the reverse-index prefilter.
pub fn significant_tokens(name: &str) -> Vec<String> {
    normalize_name(name)
        .split_whitespace()
        .filter(|token| token.len() >= 3 && !GENERIC_TOKENS.contains(token))
        .map(|token| token.to_string())
        .collect()
}

/// Full normalization pipeline. `today` anchors year-less date tokens.
pub fn normalize_stream(
    raw: &str,
    region_tokens: &[String],
    today: NaiveDate,
) -> NormalizedStream {
    // 1-2. Unicode fold + lowercase
    let mut text = fold(raw);

    // 3. Bracketed region/provider segments go away entirely; other bracket
    //    content survives (dates often ride in parentheses)
    text = bracket_re()
        .replace_all(&text, |caps: &regex::Captures| {
            let inner = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            let is_region = inner
                .split(|c: char| !c.is_alphanumeric() && c != '+')
                .filter(|t| !t.is_empty())
                .any(|t| {
                    let t = t.trim_end_matches('+');
                    region_tokens.iter().any(|r| r == t)
                        || DEFAULT_REGION_TOKENS.contains(&t)
                });
            if is_region {
                " ".to_string()
            } else {
                format!(" {inner} ")
            }
        })
        .into_owned();

    // 5. Mask dates and times before anything strips bare numbers
    let mut date = None;
    text = iso_date_re()
        .replace_all(&text, |caps: &regex::Captures| {
            if date.is_none() {
                date = NaiveDate::from_ymd_opt(
                    caps[1].parse().unwrap_or(0),
                    caps[2].parse().unwrap_or(0),
                    caps[3].parse().unwrap_or(0),
                );
            }
            " "
        })
        .into_owned();
    text = named_month_re()
        .replace_all(&text, |caps: &regex::Captures| {
            if date.is_none() {
                let month = month_number(&caps[1]);
                let day: u32 = caps[2].parse().unwrap_or(0);
                let year = caps
                    .get(3)
                    .and_then(|y| y.as_str().parse::<i32>().ok())
                    .unwrap_or_else(|| infer_year(month, day, today));
                date = NaiveDate::from_ymd_opt(year, month, day);
            }
            " "
        })
        .into_owned();
    text = us_date_re()
        .replace_all(&text, |caps: &regex::Captures| {
            if date.is_none() {
                let month: u32 = caps[1].parse().unwrap_or(0);
                let day: u32 = caps[2].parse().unwrap_or(0);
                let year = match caps.get(3).map(|y| y.as_str()) {
                    Some(y) if y.len() == 4 => y.parse().unwrap_or(today.year()),
                    Some(y) => 2000 + y.parse::<i32>().unwrap_or(0),
                    None => infer_year(month, day, today),
                };
                date = NaiveDate::from_ymd_opt(year, month, day);
            }
            " "
        })
        .into_owned();

    let mut time = None;
    text = time_re()
        .replace_all(&text, |caps: &regex::Captures| {
            if time.is_none() {
                time = parse_time_captures(caps);
            }
            " "
        })
        .into_owned();

    // 4. Leading league prefixes; the first stripped becomes a routing hint
    let mut league_hint = None;
    loop {
        let trimmed = text.trim_start_matches([' ', '|', ':', '-']).to_string();
        let Some(prefix) = LEAGUE_PREFIXES
            .iter()
            .find(|p| starts_with_token(&trimmed, p))
        else {
            text = trimmed;
            break;
        };
        if league_hint.is_none() {
            league_hint = Some(prefix.to_string());
        }
        text = trimmed[prefix.len()..].to_string();
    }

    // 6. Rank tokens are preserved, number-only channel indices dropped
    let mut ranks = Vec::new();
    text = rank_re()
        .replace_all(&text, |caps: &regex::Captures| {
            if let Some(rank) = caps
                .get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            {
                ranks.push(rank);
            }
            " "
        })
        .into_owned();
    text = channel_index_re().replace_all(&text, " ").into_owned();

    // 7. Separator collapse
    text = separator_re().replace_all(&text, " ").into_owned();

    // 8. Abbreviation expansion
    text = expand_abbreviations(&text);

    NormalizedStream {
        text: text.split_whitespace().collect::<Vec<_>>().join(" "),
        league_hint,
        date,
        time,
        ranks,
    }
}

fn starts_with_token(text: &str, token: &str) -> bool {
    text.starts_with(token)
        && text[token.len()..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(false)
}

fn month_number(name: &str) -> u32 {
    match &name[..3.min(name.len())] {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        _ => 12,
    }
}

/// Year-less dates resolve to the occurrence nearest `today`, preferring the
/// upcoming one.
fn infer_year(month: u32, day: u32, today: NaiveDate) -> i32 {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(date) if date >= today - chrono::Duration::days(30) => today.year(),
        Some(_) => today.year() + 1,
        None => today.year(),
    }
}

fn parse_time_captures(caps: &regex::Captures) -> Option<NaiveTime> {
    if let Some(hour) = caps.get(1) {
        // 12-hour clock with am/pm
        let mut hour: u32 = hour.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let pm = caps.get(3)?.as_str() == "pm";
        if pm && hour != 12 {
            hour += 12;
        } else if !pm && hour == 12 {
            hour = 0;
        }
        NaiveTime::from_hms_opt(hour, minute, 0)
    } else {
        // 24-hour clock
        let hour: u32 = caps.get(4)?.as_str().parse().ok()?;
        let minute: u32 = caps.get(5)?.as_str().parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        NaiveTime::from_hms_opt(hour, minute, 0)
    }
}

fn expand_abbreviations(text: &str) -> String {
    let mut out = Vec::new();
    for token in text.split_whitespace() {
        match token {
            "fn" => out.extend(["fight", "night"]),
            "ppv" => out.extend(["pay", "per", "view"]),
            "v" | "vs" | "vs." => out.push("versus"),
            "@" | "at" => out.push("at"),
            other => out.push(other),
        }
    }
    out.join(" ")
}
