//! Best-effort publication date parsing.
//!
//! News sites print dates in every format imaginable. [`parse_date`] tries the
//! common ones and [`normalize_date`] renders whatever it understands as
//! `YYYY-MM-DD`, passing anything else through untouched so no information is
//! lost.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s+(second|sec|minute|min|hour|hr|h|day|d)s?\s+ago").unwrap()
});
static EMBEDDED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})[-/](\d{1,2})[-/](\d{1,2})").unwrap());

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y年%m月%d日",
];

/// Parse a date string relative to `now`.
///
/// Returns `None` when nothing recognizable is found.
pub fn parse_date(raw: &str, now: DateTime<Utc>) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(caps) = RELATIVE.captures(s) {
        if let Some(dt) = ago(&caps[1], &caps[2], now) {
            return Some(dt);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    let caps = EMBEDDED.captures(s)?;
    NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// `now` minus `amount` units, or `None` when the offset is out of range.
fn ago(amount: &str, unit: &str, now: DateTime<Utc>) -> Option<NaiveDateTime> {
    let amount: i64 = amount.parse().ok()?;
    let delta = match unit.to_lowercase().as_str() {
        "second" | "sec" => Duration::try_seconds(amount),
        "minute" | "min" => Duration::try_minutes(amount),
        "hour" | "hr" | "h" => Duration::try_hours(amount),
        _ => Duration::try_days(amount),
    }?;
    now.checked_sub_signed(delta).map(|dt| dt.naive_utc())
}

/// Render a parseable date as `YYYY-MM-DD`; return the trimmed input otherwise.
pub fn normalize_date(raw: &str, now: DateTime<Utc>) -> String {
    match parse_date(raw, now) {
        Some(dt) => dt.format("%Y-%m-%d").to_string(),
        None => raw.trim().to_string(),
    }
}

/// Today's date in the store's time zone (UTC).
pub fn today(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Whether a publication date is within `max_age_days` of `now`.
///
/// Missing and unparseable dates count as recent so nothing is dropped on a
/// formatting guess.
pub fn is_recent(raw: &str, now: DateTime<Utc>, max_age_days: i64) -> bool {
    match parse_date(raw, now) {
        Some(dt) => Duration::try_days(max_age_days)
            .and_then(|age| now.checked_sub_signed(age))
            .is_none_or(|cutoff| dt >= cutoff.naive_utc()),
        None => true,
    }
}
