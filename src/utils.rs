//! Utility functions for text cleanup, URL handling and file system checks.
//!
//! This module provides helpers used throughout the pipeline:
//! - Text cleanup for titles and article bodies scraped from arbitrary HTML
//! - Domain extraction used for `source` fields and trust-weight lookups
//! - String truncation for logging
//! - Directory validation for the store location

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

static CONTROL_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F\u{FEFF}]").unwrap());

/// Boilerplate that leaks into scraped text from navigation bars and share widgets.
static BOILERPLATE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Home\s+>\s+.*?\s+>\s+.*?\s+>",
        r"Menu\s+Search\s+.*?Sign in",
        r"Toggle menu.*?Toggle search",
        r"Share\s+on\s+(Facebook|Twitter|LinkedIn)",
        r"(?s)An official website of the United States Government.*?secure websites\.",
        r"Read more:.*",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());

/// Normalize scraped text.
///
/// Decodes the handful of HTML entities that survive parsing, strips control
/// characters and common navigation boilerplate, and collapses whitespace.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(clean_text("  Gold &amp; Silver\n\n rally "), "Gold & Silver rally");
/// ```
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut out = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace('\u{a0}', " ");

    out = CONTROL_CHARS.replace_all(&out, "").into_owned();
    for pattern in BOILERPLATE.iter() {
        out = pattern.replace_all(&out, "").into_owned();
    }

    WHITESPACE.replace_all(&out, " ").trim().to_string()
}

/// Remove markup from an HTML fragment (feed descriptions) and clean the rest.
pub fn strip_tags(html: &str) -> String {
    clean_text(&TAGS.replace_all(html, " "))
}

/// Keep at most the first three sentences of `text`.
///
/// Used to cut paywall previews and first paragraphs down to a teaser.
pub fn first_sentences(text: &str, max_sentences: usize) -> String {
    let mut end = text.len();
    for (count, m) in SENTENCE_END.find_iter(text).enumerate() {
        if count + 1 == max_sentences {
            end = m.start() + 1;
            break;
        }
    }
    text[..end].trim().to_string()
}

/// Host of `url` in lowercase with a leading `www.` removed.
///
/// This is the value stored in `ArticleRecord::source` and the key used for
/// trust-weight lookups.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(source_domain("https://www.kitco.com/news/"), Some("kitco.com".into()));
/// assert_eq!(source_domain("not a url"), None);
/// ```
pub fn source_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a character boundary) with
/// an ellipsis and byte count appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure the directory that will hold the store exists and is writable.
///
/// Creates the directory if needed, then writes and deletes a probe file so a
/// permissions problem is reported before any network work is done.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Store directory is writable");
    Ok(())
}
