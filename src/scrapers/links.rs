//! Generic article-link extraction from listing pages.
//!
//! There is no per-site schema here. An ordered list of structural patterns
//! (article blocks, headline tags, cards, list items) collects candidate
//! anchors; the survivors of dedup and the topical gate become unscored
//! [`ArticleRecord`] skeletons, which are then scored and cut to the best few.

use crate::dates::{normalize_date, today};
use crate::models::ArticleRecord;
use crate::scoring::{Scorer, is_gold_related};
use crate::utils::{clean_text, source_domain};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, instrument};
use url::Url;

/// Anchor patterns in the order they are tried.
const LINK_PATTERNS: &[&str] = &[
    "article a",
    "article h2 a",
    "article h3 a",
    "article .title a",
    ".news-item a",
    ".news-title a",
    ".article-title a",
    ".post a",
    ".entry a",
    ".entry-title a",
    "h2 a",
    "h3 a",
    ".headline a",
    ".card a",
    ".item a",
    ".story a",
    ".list a[href*=news]",
    ".list a[href*=article]",
];

const DATE_CLASSES: &str = "span.date, span.time, .published, .timestamp";
const DATE_SEARCH_DEPTH: usize = 3;

/// Extract up to `cap` scored article skeletons from a listing page.
#[instrument(level = "info", skip(html, scorer), fields(bytes = html.len()))]
pub fn extract(html: &str, source_url: &str, scorer: &Scorer, cap: usize) -> Vec<ArticleRecord> {
    extract_at(html, source_url, scorer, cap, Utc::now())
}

pub(crate) fn extract_at(
    html: &str,
    source_url: &str,
    scorer: &Scorer,
    cap: usize,
    now: DateTime<Utc>,
) -> Vec<ArticleRecord> {
    let Ok(base) = Url::parse(source_url) else {
        debug!("Source URL does not parse; nothing to resolve links against");
        return Vec::new();
    };
    let source = source_domain(source_url).unwrap_or_default();
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut unique: Vec<(ElementRef, String)> = Vec::new();
    for pattern in LINK_PATTERNS {
        let Ok(selector) = Selector::parse(pattern) else {
            continue;
        };
        for anchor in document.select(&selector) {
            let Some(link) = anchor.value().attr("href").and_then(|h| resolve(&base, h)) else {
                continue;
            };
            if seen.insert(link.clone()) {
                unique.push((anchor, link));
            }
        }
    }
    info!(%source, unique = unique.len(), "Collected candidate links");

    let time_sel = Selector::parse("time").ok();
    let class_sel = Selector::parse(DATE_CLASSES).ok();
    let img_sel = Selector::parse("img[alt]").ok();

    let mut records: Vec<ArticleRecord> = unique
        .into_iter()
        .filter_map(|(anchor, link)| {
            let title = title_of(anchor, img_sel.as_ref())?;
            if !is_gold_related(&title) {
                return None;
            }
            let publication_date = date_near(anchor, time_sel.as_ref(), class_sel.as_ref())
                .map(|raw| normalize_date(&raw, now))
                .unwrap_or_else(|| today(now));
            let mut record = ArticleRecord::skeleton(title, link, source.clone(), publication_date);
            record.fetched_at = now;
            record.score = scorer.score_link(&record.title, &source);
            Some(record)
        })
        .collect();

    records.sort_by(|a, b| b.score.total_cmp(&a.score));
    records.truncate(cap);
    debug!(kept = records.len(), "Relevant links after scoring");
    records
}

/// Absolute http(s) URL for `href`, without its fragment.
pub(crate) fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Visible anchor text, or the `alt` of an image inside it.
fn title_of(anchor: ElementRef, img_sel: Option<&Selector>) -> Option<String> {
    let text = clean_text(&anchor.text().collect::<Vec<_>>().join(" "));
    if !text.is_empty() {
        return Some(text);
    }
    let img = anchor.select(img_sel?).next()?;
    let alt = clean_text(img.value().attr("alt")?);
    (!alt.is_empty()).then_some(alt)
}

/// Raw date text from the nearest of the anchor's first few ancestors.
fn date_near(
    anchor: ElementRef,
    time_sel: Option<&Selector>,
    class_sel: Option<&Selector>,
) -> Option<String> {
    for ancestor in anchor.ancestors().filter_map(ElementRef::wrap).take(DATE_SEARCH_DEPTH) {
        if let Some(time) = time_sel.and_then(|sel| ancestor.select(sel).next()) {
            let raw = time
                .value()
                .attr("datetime")
                .map(str::to_string)
                .unwrap_or_else(|| time.text().collect::<String>());
            let raw = raw.trim();
            if !raw.is_empty() {
                return Some(raw.to_string());
            }
        }
        if let Some(sel) = class_sel {
            for el in ancestor.select(sel) {
                let raw = clean_text(&el.text().collect::<String>());
                if !raw.is_empty() {
                    return Some(raw);
                }
            }
        }
    }
    None
}
