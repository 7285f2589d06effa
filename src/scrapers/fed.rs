//! Federal Reserve press releases and FOMC documents.
//!
//! The Fed's two index pages are tables rather than article listings, so the
//! generic link patterns read them poorly. The press-release index keeps the
//! date and the headline in separate columns of a `div.row.item`; the FOMC
//! calendar has one panel per meeting whose heading carries the date. An entry
//! is kept when its title names a market term and its date is recent.

use crate::dates::{is_recent, normalize_date};
use crate::models::ArticleRecord;
use crate::scoring::Scorer;
use crate::scrapers::links::resolve;
use crate::utils::{clean_text, source_domain};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

const FED_KEYWORDS: &[&str] = &[
    "gold",
    "federal reserve",
    "wall street",
    "precious metals",
    "commodities",
    "bullion",
    "xau",
    "silver",
    "platinum",
];

/// Shared inputs for turning index entries into records.
pub struct FedIndex<'a> {
    base: Url,
    source: String,
    scorer: &'a Scorer,
    max_age_days: i64,
    now: DateTime<Utc>,
}

impl<'a> FedIndex<'a> {
    /// `None` when `page_url` does not parse.
    pub fn new(page_url: &str, scorer: &'a Scorer, max_age_days: i64, now: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            base: Url::parse(page_url).ok()?,
            source: source_domain(page_url)?,
            scorer,
            max_age_days,
            now,
        })
    }

    /// Recent, relevant rows of the press-release index.
    #[instrument(level = "info", skip_all, fields(source = %self.source))]
    pub fn press_releases(&self, html: &str) -> Vec<ArticleRecord> {
        let document = Html::parse_document(html);
        let (Ok(rows), Ok(date_sel), Ok(link_sel)) = (
            Selector::parse("div#article div.row.item"),
            Selector::parse("div.col-xs-2"),
            Selector::parse("div.col-xs-10 a"),
        ) else {
            return Vec::new();
        };

        let records: Vec<ArticleRecord> = document
            .select(&rows)
            .filter_map(|row| {
                let date = text_of(row.select(&date_sel).next()?);
                if !is_recent(&date, self.now, self.max_age_days) {
                    debug!(%date, "Skipping old release");
                    return None;
                }
                self.record(row.select(&link_sel).next()?, &date, "release")
            })
            .unique_by(|r| r.link.clone())
            .collect();
        info!(count = records.len(), "Fed press releases collected");
        records
    }

    /// Relevant documents linked from recent FOMC meeting panels.
    #[instrument(level = "info", skip_all, fields(source = %self.source))]
    pub fn fomc_calendar(&self, html: &str) -> Vec<ArticleRecord> {
        let document = Html::parse_document(html);
        let (Ok(panels), Ok(heading_sel), Ok(link_sel)) = (
            Selector::parse("div.panel-default"),
            Selector::parse("div.panel-heading"),
            Selector::parse("a"),
        ) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for panel in document.select(&panels) {
            let Some(heading) = panel.select(&heading_sel).next() else {
                continue;
            };
            let date = text_of(heading);
            if !is_recent(&date, self.now, self.max_age_days) {
                continue;
            }
            records.extend(
                panel
                    .select(&link_sel)
                    .filter_map(|anchor| self.record(anchor, &date, "report")),
            );
        }
        let records: Vec<ArticleRecord> = records.into_iter().unique_by(|r| r.link.clone()).collect();
        info!(count = records.len(), "FOMC documents collected");
        records
    }

    fn record(&self, anchor: ElementRef, date: &str, kind: &str) -> Option<ArticleRecord> {
        let title = text_of(anchor);
        let lower = title.to_lowercase();
        if title.is_empty() || !FED_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return None;
        }
        let link = resolve(&self.base, anchor.value().attr("href")?)?;
        let summary = format!("Federal Reserve {kind}: {title} from {date}");
        let mut record = ArticleRecord::skeleton(
            title,
            link,
            self.source.clone(),
            normalize_date(date, self.now),
        );
        record.fetched_at = self.now;
        record.score = self.scorer.score_link(&record.title, &self.source);
        record.summary = Some(summary);
        Some(record)
    }
}

fn text_of(element: ElementRef) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}
