//! Runtime settings loaded from an optional YAML file.
//!
//! Every field has a default, so an absent or partial `config.yaml` still
//! yields a complete [`Settings`]. Values given on the command line (store
//! path, proxy switch, API key) are applied on top in `main`.
//!
//! # Example
//!
//! ```yaml
//! sources:
//!   - url: https://www.kitco.com/news/category/gold-news/
//!     kind: page
//!   - url: https://www.kitco.com/news/category/gold-news/feed/
//!     kind: feed
//! request:
//!   max_attempts: 3
//!   base_delay_ms: 3000
//! store:
//!   path: data/news_db.json
//!   retention_days: 14
//! ```

use crate::models::{Source, SourceKind};
use crate::scrapers::selectors::SelectorSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub sources: Vec<Source>,
    pub source_weights: BTreeMap<String, f64>,
    pub user_agents: Vec<String>,
    pub request: RequestSettings,
    pub proxies: ProxySettings,
    pub store: StoreSettings,
    pub scoring: ScoringSettings,
    pub content: ContentSettings,
    pub news_api: NewsApiSettings,
    pub price: PriceSettings,
    /// Per-domain selector sets that refine the generic extraction cascade.
    pub overrides: BTreeMap<String, SelectorSet>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            source_weights: default_source_weights(),
            user_agents: default_user_agents(),
            request: RequestSettings::default(),
            proxies: ProxySettings::default(),
            store: StoreSettings::default(),
            scoring: ScoringSettings::default(),
            content: ContentSettings::default(),
            news_api: NewsApiSettings::default(),
            price: PriceSettings::default(),
            overrides: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or the defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        let Some(path) = path else {
            info!("No config file given; using built-in settings");
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml(&raw)?;
        info!(path = %path.display(), sources = settings.sources.len(), "Loaded configuration");
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestSettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 25,
            max_attempts: 3,
            base_delay_ms: 3000,
        }
    }
}

impl RequestSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Response format of a proxy-listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyListFormat {
    /// One `host:port` per line.
    Plain,
    /// `{"data": [{"ip": "...", "port": "..."}]}`
    PubproxyJson,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyListing {
    pub url: String,
    pub format: ProxyListFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub refresh_interval_secs: u64,
    pub failure_threshold: u32,
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    pub listing_sources: Vec<ProxyListing>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval_secs: 30 * 60,
            failure_threshold: 3,
            probe_url: "https://www.google.com".to_string(),
            probe_timeout_secs: 5,
            listing_sources: vec![
                ProxyListing {
                    url: "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all".to_string(),
                    format: ProxyListFormat::Plain,
                },
                ProxyListing {
                    url: "http://pubproxy.com/api/proxy?limit=20&format=json&https=true".to_string(),
                    format: ProxyListFormat::PubproxyJson,
                },
            ],
        }
    }
}

/// Sort order of the persisted collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    FetchedAt,
    PublicationDate,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub retention_days: i64,
    pub max_records: Option<usize>,
    pub sort_by: SortKey,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/news_db.json"),
            retention_days: 14,
            max_records: Some(100),
            sort_by: SortKey::FetchedAt,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub min_score: f64,
    pub per_page_cap: usize,
    pub per_feed_cap: usize,
    pub feed_score_ceiling: f64,
    pub max_article_age_days: i64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            min_score: 5.0,
            per_page_cap: 10,
            per_feed_cap: 10,
            feed_score_ceiling: 20.0,
            max_article_age_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentSettings {
    pub fetch: bool,
    pub min_length: usize,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            fetch: true,
            min_length: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NewsApiSettings {
    pub endpoint: String,
    pub query: String,
    pub page_size: u32,
    /// Supplied through `--news-api-key` / `NEWS_API_KEY`, never from YAML.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for NewsApiSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://newsapi.org/v2/everything".to_string(),
            query: "gold OR \"precious metals\" OR bullion OR XAU".to_string(),
            page_size: 20,
            api_key: None,
        }
    }
}

/// The gold futures price snapshot.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PriceSettings {
    pub enabled: bool,
    /// Chart API answering with `chart.result[0].meta`.
    pub chart_url: String,
    /// Human-facing quote page the snapshot record links to.
    pub quote_url: String,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            chart_url: "https://query1.finance.yahoo.com/v8/finance/chart/GC=F".to_string(),
            quote_url: "https://finance.yahoo.com/quote/GC=F".to_string(),
        }
    }
}

fn default_sources() -> Vec<Source> {
    vec![
        Source::page("https://www.kitco.com/news/category/gold-news/"),
        Source::page("https://www.gold.org/news-and-events/news"),
        Source::page("https://goldprice.org/gold-news.html"),
        Source::page("https://www.reuters.com/markets/commodities/"),
        Source::page("https://www.investing.com/news/commodities-news"),
        Source::page("https://www.bullionvault.com/gold-news"),
        Source::page("https://www.moneymetals.com/news"),
        Source::page("https://www.apmex.com/blog/category/market-updates"),
        Source::feed("https://www.kitco.com/news/category/gold-news/feed/"),
        Source::feed("https://www.gold.org/news-and-events/news/rss"),
        Source::feed("https://bullionvault.com/gold-news/feed/"),
        Source::feed("https://feeds.bloomberg.com/markets/news.rss"),
        Source::feed("https://www.cnbc.com/id/100003114/device/rss/rss.html"),
        Source::feed("https://finance.yahoo.com/rss/topfinstories"),
        Source::new(
            "https://www.federalreserve.gov/newsevents/pressreleases.htm",
            SourceKind::FedReleases,
        ),
        Source::new(
            "https://www.federalreserve.gov/monetarypolicy/fomccalendars.htm",
            SourceKind::FomcCalendar,
        ),
    ]
}

fn default_source_weights() -> BTreeMap<String, f64> {
    [
        ("kitco.com", 10.0),
        ("federalreserve.gov", 9.0),
        ("gold.org", 10.0),
        ("goldprice.org", 9.0),
        ("bullionvault.com", 8.0),
        ("moneymetals.com", 8.0),
        ("apmex.com", 7.0),
        ("reuters.com", 6.0),
        ("bloomberg.com", 6.0),
        ("investing.com", 5.0),
        ("ft.com", 5.0),
    ]
    .into_iter()
    .map(|(domain, weight)| (domain.to_string(), weight))
    .collect()
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.4 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36 Edg/113.0.1774.57",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
