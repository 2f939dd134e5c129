//! Semantic string formats checked beyond structural typing.

use std::sync::LazyLock;

use chrono::Duration;
use regex::Regex;

use crate::quality::Requirement;
use crate::template::Template;

/// Checks string content; the error is a human readable reason.
pub type FormatChecker = fn(&str) -> Result<(), String>;

/// Formats available to every validator.
pub fn builtin_formats() -> Vec<(&'static str, FormatChecker)> {
    vec![
        ("quality", check_quality),
        ("quality_requirements", check_quality),
        ("interval", check_interval),
        ("size", check_size),
        ("regex", check_regex),
        ("path", check_path),
        ("url", check_url),
        ("episode_identifier", check_episode_identifier),
        ("file_template", check_file_template),
    ]
}

fn check_quality(s: &str) -> Result<(), String> {
    s.parse::<Requirement>().map(|_| ())
}

fn check_interval(s: &str) -> Result<(), String> {
    parse_interval(s)
        .map(|_| ())
        .ok_or_else(|| format!("'{s}' is not a valid interval (e.g. '30 minutes', '2 days')"))
}

fn check_size(s: &str) -> Result<(), String> {
    parse_size_mib(s)
        .map(|_| ())
        .ok_or_else(|| format!("'{s}' is not a valid size (e.g. '700 MB', '1.5 GiB')"))
}

fn check_regex(s: &str) -> Result<(), String> {
    Regex::new(s).map(|_| ()).map_err(|e| e.to_string())
}

fn check_path(s: &str) -> Result<(), String> {
    if s.trim().is_empty() {
        return Err("path is empty".into());
    }
    shellexpand::full(s)
        .map(|_| ())
        .map_err(|e| format!("'{s}' cannot be expanded: {e}"))
}

fn check_url(s: &str) -> Result<(), String> {
    url::Url::parse(s)
        .map(|_| ())
        .map_err(|e| format!("'{s}' is not a valid url: {e}"))
}

fn check_episode_identifier(s: &str) -> Result<(), String> {
    static EP_ID: LazyLock<Option<Regex>> = LazyLock::new(|| {
        Regex::new(r"(?i)^(s\d+e\d+|\d+x\d+|\d{4}-\d{2}-\d{2}|\d+)$").ok()
    });
    match EP_ID.as_ref() {
        Some(re) if re.is_match(s.trim()) => Ok(()),
        _ => Err(format!(
            "'{s}' must be an episode identifier (S01E02, 1x02, 2024-01-31) or a sequence number"
        )),
    }
}

fn check_file_template(s: &str) -> Result<(), String> {
    Template::parse(s).map(|_| ()).map_err(|e| e.to_string())
}

/// Parse `"<amount> <unit>"` where unit is seconds|minutes|hours|days|weeks
/// (singular or plural).
pub fn parse_interval(s: &str) -> Option<Duration> {
    let mut parts = s.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.to_lowercase();
    if parts.next().is_some() || amount < 0 {
        return None;
    }
    match unit.trim_end_matches('s') {
        "second" => Duration::try_seconds(amount),
        "minute" => Duration::try_minutes(amount),
        "hour" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        "week" => Duration::try_weeks(amount),
        _ => None,
    }
}

/// Parse a human size into MiB. Bare numbers are MiB.
pub fn parse_size_mib(s: &str) -> Option<f64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let amount: f64 = s[..split].parse().ok()?;
    let unit = s[split..].trim().to_lowercase();
    let factor = match unit.as_str() {
        "" | "m" | "mb" | "mib" => 1.0,
        "k" | "kb" | "kib" => 1.0 / 1024.0,
        "g" | "gb" | "gib" => 1024.0,
        "t" | "tb" | "tib" => 1024.0 * 1024.0,
        _ => return None,
    };
    Some(amount * factor)
}
