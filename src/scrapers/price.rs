//! Gold futures price snapshot.
//!
//! One record per day summarising where gold trades against the previous
//! close, read from a chart API that answers with `chart.result[0].meta`.
//! The record goes through the same scoring as feed entries and carries the
//! raw figures under a `data` key for readers that want numbers.

use crate::config::PriceSettings;
use crate::models::{ArticleRecord, FeedEntry};
use crate::scoring::Scorer;
use crate::scrapers::feeds::entry_record;
use crate::utils::source_domain;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::error::Error;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    previous_close: Option<f64>,
    #[serde(default)]
    chart_previous_close: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

/// Last price against the previous close.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub price: f64,
    pub previous_close: f64,
    pub currency: String,
}

impl PriceSnapshot {
    pub fn change(&self) -> f64 {
        self.price - self.previous_close
    }

    pub fn change_percent(&self) -> f64 {
        self.change() / self.previous_close * 100.0
    }

    fn entry(&self, quote_url: &str, now: DateTime<Utc>) -> FeedEntry {
        let (price, prev, change, pct) = (self.price, self.previous_close, self.change(), self.change_percent());
        let direction = if change >= 0.0 { "up" } else { "down" };
        FeedEntry {
            title: format!("Gold Price Update: ${price:.2} ({pct:+.2}%)"),
            // One record per day; the fragment keeps daily snapshots distinct.
            link: format!("{quote_url}#{}", now.format("%Y-%m-%d")),
            description: format!(
                "Gold is trading at ${price:.2}, {direction} {:.2}% from the previous close of ${prev:.2}.",
                pct.abs()
            ),
            content: format!(
                "Current Gold Price: ${price:.2}\nChange: ${change:+.2} ({pct:+.2}%)\nPrevious Close: ${prev:.2}"
            ),
            published: Some(now.to_rfc3339()),
        }
    }
}

/// Parse a chart response; errors when the price or previous close is missing.
pub fn parse_chart(body: &str) -> Result<PriceSnapshot, Box<dyn Error>> {
    let resp: ChartResponse = serde_json::from_str(body)?;
    if let Some(err) = resp.chart.error.filter(|e| !e.is_null()) {
        return Err(format!("chart API error: {err}").into());
    }
    let meta = resp
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .map(|r| r.meta)
        .ok_or("chart response has no result")?;

    let price = meta
        .regular_market_price
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or("chart response has no market price")?;
    let previous_close = meta
        .previous_close
        .or(meta.chart_previous_close)
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or("chart response has no previous close")?;
    debug!(price, previous_close, "Parsed price chart");
    Ok(PriceSnapshot {
        price,
        previous_close,
        currency: meta.currency.unwrap_or_else(|| "USD".to_string()),
    })
}

/// The day's price record, with the raw figures under `data`.
pub fn snapshot_record(
    snapshot: &PriceSnapshot,
    settings: &PriceSettings,
    scorer: &Scorer,
    now: DateTime<Utc>,
) -> Option<ArticleRecord> {
    let source = source_domain(&settings.quote_url)?;
    let mut record = entry_record(snapshot.entry(&settings.quote_url, now), &source, scorer, now)?;
    record.extra.insert(
        "data".to_string(),
        json!({
            "price": snapshot.price,
            "change": snapshot.change(),
            "change_percent": snapshot.change_percent(),
            "prev_close": snapshot.previous_close,
            "currency": snapshot.currency,
            "unit": "troy ounce",
        }),
    );
    info!(price = snapshot.price, change_percent = snapshot.change_percent(), "Gold price snapshot");
    Some(record)
}
