//! NewsAPI-style JSON search as an extra structured source.
//!
//! Skipped entirely without an API key. Results go through the same feed
//! scoring as RSS entries, but `source` comes from each article's own URL.

use crate::config::NewsApiSettings;
use crate::models::{ArticleRecord, FeedEntry};
use crate::scoring::Scorer;
use crate::scrapers::feeds::entry_record;
use crate::utils::source_domain;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::error::Error;
use tracing::{debug, info};

const REMOVED: &str = "[Removed]";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    status: String,
    #[serde(default)]
    articles: Vec<ApiArticle>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

/// Search URL for the configured query, or `None` when no key is set.
pub fn search_url(settings: &NewsApiSettings) -> Option<String> {
    let key = settings.api_key.as_deref().filter(|k| !k.trim().is_empty())?;
    Some(format!(
        "{}?q={}&sortBy=publishedAt&language=en&pageSize={}&apiKey={}",
        settings.endpoint,
        urlencoding::encode(&settings.query),
        settings.page_size,
        urlencoding::encode(key)
    ))
}

/// Parse a search response into entries, dropping removed articles.
pub fn parse_response(body: &str) -> Result<Vec<FeedEntry>, Box<dyn Error>> {
    let resp: SearchResponse = serde_json::from_str(body)?;
    if resp.status != "ok" {
        return Err(format!(
            "news API returned status {}: {}",
            resp.status,
            resp.message.unwrap_or_default()
        )
        .into());
    }

    let total = resp.articles.len();
    let entries: Vec<FeedEntry> = resp
        .articles
        .into_iter()
        .filter(|a| a.title.as_deref() != Some(REMOVED))
        .map(|a| FeedEntry {
            title: a.title.unwrap_or_default().trim().to_string(),
            link: a.url.unwrap_or_default(),
            description: a.description.unwrap_or_default().trim().to_string(),
            content: a.content.unwrap_or_default().trim().to_string(),
            published: a.published_at,
        })
        .collect();
    debug!(total, kept = entries.len(), "Parsed news API response");
    Ok(entries)
}

/// Scored records for API entries, each attributed to its own domain.
pub fn api_records(entries: Vec<FeedEntry>, scorer: &Scorer, now: DateTime<Utc>) -> Vec<ArticleRecord> {
    let records: Vec<ArticleRecord> = entries
        .into_iter()
        .filter_map(|entry| {
            let source = source_domain(&entry.link)?;
            entry_record(entry, &source, scorer, now)
        })
        .collect();
    info!(count = records.len(), "News API records built");
    records
}
