//! Data models for scraped gold-market news.
//!
//! This module defines the record shape shared by every stage of the pipeline:
//! - [`ArticleRecord`]: one article, from extraction skeleton to persisted entry
//! - [`FeedEntry`]: a raw item parsed out of an RSS/Atom feed or a news API
//! - [`Source`] / [`SourceKind`]: a configured place to look for articles
//!
//! The persisted JSON shape is documented on [`ArticleRecord`]; the web layer
//! and the summarizer read it, so field names are part of the contract.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A single news article.
///
/// Records are created as skeletons by the extractors (`content` empty,
/// `summary` unset), scored before admission, and merged into the persisted
/// collection where `link` is the identity key.
///
/// # JSON Shape
///
/// ```text
/// {
///   "title": "Gold hits record high",
///   "link": "https://example.com/news/gold-hits-record",
///   "source": "example.com",
///   "publication_date": "2025-05-06",
///   "fetched_at": "2025-05-06T08:00:00Z",
///   "content": "",
///   "summary": null,
///   "score": 13.0,
///   "is_paywalled": false,
///   "summarized": false
/// }
/// ```
///
/// Keys written by other tools are kept in `extra` and survive a rewrite.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ArticleRecord {
    /// Cleaned headline; never empty for an admitted record.
    pub title: String,
    /// Canonical absolute URL, unique within the collection.
    pub link: String,
    /// Registrable domain of the link or feed, e.g. `kitco.com`.
    pub source: String,
    /// `YYYY-MM-DD` when the page gave a parseable date, the raw text otherwise.
    #[serde(alias = "pub_date", default)]
    pub publication_date: String,
    /// Set once when the record is created; the first-seen copy wins on merge.
    #[serde(deserialize_with = "deserialize_fetched_at")]
    pub fetched_at: DateTime<Utc>,
    /// Article body; filled by the content pass, possibly a paywall preview.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub is_paywalled: bool,
    /// Owned by the summarizer; absent or false means "not summarized yet".
    #[serde(default)]
    pub summarized: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ArticleRecord {
    /// Build an unscored skeleton stamped with the current UTC time.
    pub fn skeleton(title: String, link: String, source: String, publication_date: String) -> Self {
        Self {
            title,
            link,
            source,
            publication_date,
            fetched_at: Utc::now(),
            content: String::new(),
            summary: None,
            score: 0.0,
            is_paywalled: false,
            summarized: false,
            extra: Map::new(),
        }
    }
}

/// Accept RFC 3339 timestamps, and naive ISO timestamps written by older
/// versions of the store (interpreted as UTC).
fn deserialize_fetched_at<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// A raw entry from a structured feed, before it becomes an [`ArticleRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    /// Plain-text description or summary.
    pub description: String,
    /// Plain-text full content when the feed carries it.
    pub content: String,
    /// Raw date string as published.
    pub published: Option<String>,
}

/// How a configured URL is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Listing page crawled with the generic link patterns.
    Page,
    /// RSS 2.0 or Atom feed.
    Feed,
    /// Federal Reserve press-release index (`div.row.item` rows).
    FedReleases,
    /// Federal Reserve FOMC calendar (one panel per meeting).
    FomcCalendar,
}

/// One configured ingestion source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Source {
    pub url: String,
    pub kind: SourceKind,
}

impl Source {
    pub fn new(url: &str, kind: SourceKind) -> Self {
        Self {
            url: url.to_string(),
            kind,
        }
    }

    pub fn page(url: &str) -> Self {
        Self::new(url, SourceKind::Page)
    }

    pub fn feed(url: &str) -> Self {
        Self::new(url, SourceKind::Feed)
    }
}
