//! One collection run, start to finish.
//!
//! ```text
//! sources ─┬─ page ─> fetch ─> links::extract ──┐
//!          ├─ feed ─> fetch ─> feeds::parse ────┤
//!          ├─ fed ──> fetch ─> fed::FedIndex ───┤
//!          ├─ news API (optional) ──────────────┤
//!          └─ price snapshot (optional) ────────┤
//!                                               v
//!                        admit ─> enrich (article bodies) ─> store merge
//! ```
//!
//! Sources are visited one at a time with a randomised pause in between; the
//! pacing is part of staying under anti-bot radar. A failing source is logged
//! and skipped. An interrupt stops new work but what was gathered is still
//! merged.

use crate::config::Settings;
use crate::dates::is_recent;
use crate::models::{ArticleRecord, Source, SourceKind};
use crate::net::fetcher::Fetcher;
use crate::net::transport::Transport;
use crate::outputs::store::{MergeSummary, Store};
use crate::scoring::{Scorer, is_advert};
use crate::scrapers::content::extract_content;
use crate::scrapers::selectors::SelectorRegistry;
use crate::scrapers::fed::FedIndex;
use crate::scrapers::{feeds, links, newsapi, price};
use crate::shutdown::Shutdown;
use crate::utils::{source_domain, truncate_for_log};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::collections::HashSet;
use std::error::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Counters for one scrape run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sources_attempted: usize,
    pub sources_failed: usize,
    pub candidates: usize,
    pub admitted: usize,
    pub enriched: usize,
    pub accepted: usize,
    pub total: usize,
    pub interrupted: bool,
}

pub struct Pipeline<T> {
    settings: Settings,
    fetcher: Fetcher<T>,
    scorer: Scorer,
    registry: SelectorRegistry,
    store: Store,
    shutdown: Shutdown,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(transport: T, settings: Settings, shutdown: Shutdown) -> Self {
        Self {
            fetcher: Fetcher::new(transport, &settings, shutdown.clone()),
            scorer: Scorer::new(settings.source_weights.clone(), settings.scoring.feed_score_ceiling),
            registry: SelectorRegistry::with_overrides(&settings.overrides),
            store: Store::new(&settings.store),
            settings,
            shutdown,
        }
    }

    /// Scrape every source, enrich and admit the results, merge into the store.
    #[instrument(level = "info", skip_all, fields(sources = self.settings.sources.len()))]
    pub async fn scrape(&self) -> Result<RunReport, Box<dyn Error>> {
        let _lock = self.store.lock()?;
        self.fetcher.begin_run();
        let now = Utc::now();
        let mut report = RunReport::default();

        let mut gathered = Vec::new();
        let sources = &self.settings.sources;
        for (i, source) in sources.iter().enumerate() {
            if self.shutdown.is_triggered() {
                warn!(remaining = sources.len() - i, "Shutdown requested; skipping remaining sources");
                report.interrupted = true;
                break;
            }
            report.sources_attempted += 1;
            match self.scrape_source(source, now).await {
                Some(records) => gathered.extend(records),
                None => report.sources_failed += 1,
            }
            if i + 1 < sources.len() {
                self.pause(1.0).await;
            }
        }
        if !self.shutdown.is_triggered() {
            gathered.extend(self.scrape_news_api(now).await);
        }
        if !self.shutdown.is_triggered() {
            gathered.extend(self.scrape_price(now).await);
        }
        report.candidates = gathered.len();

        let admitted = self.admit(gathered, now);
        report.admitted = admitted.len();

        let admitted = if self.settings.content.fetch {
            let known = self.known_links().await;
            let (records, enriched) = self.enrich(admitted, &known).await;
            report.enriched = enriched;
            records
        } else {
            admitted
        };
        report.interrupted |= self.shutdown.is_triggered();

        let MergeSummary { accepted, total } = self.store.merge_and_write(admitted, now).await?;
        report.accepted = accepted;
        report.total = total;
        info!(?report, invalid_urls = self.fetcher.invalid_count(), "Run complete");
        Ok(report)
    }

    /// Records from one source, or `None` when the source failed outright.
    #[instrument(level = "info", skip_all, fields(url = %source.url, kind = ?source.kind))]
    async fn scrape_source(&self, source: &Source, now: DateTime<Utc>) -> Option<Vec<ArticleRecord>> {
        match source.kind {
            SourceKind::Page => {
                let Some(resp) = self.fetcher.fetch(&source.url, None).await else {
                    warn!("Source page unavailable; moving on");
                    return None;
                };
                let records = links::extract(&resp.body, &source.url, &self.scorer, self.settings.scoring.per_page_cap);
                if records.is_empty() {
                    info!(
                        snippet = %truncate_for_log(&resp.body, 200),
                        "No relevant links found on page"
                    );
                }
                Some(records)
            }
            SourceKind::Feed => {
                let headers = accept_headers(
                    "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
                );
                let Some(resp) = self.fetcher.fetch(&source.url, Some(headers)).await else {
                    warn!("Feed unavailable; moving on");
                    return None;
                };
                match feeds::parse_feed(&resp.body) {
                    Ok(entries) => Some(feeds::feed_records(
                        entries,
                        &source.url,
                        &self.scorer,
                        self.settings.scoring.per_feed_cap,
                        now,
                    )),
                    Err(e) => {
                        error!(error = %e, "Feed did not parse");
                        None
                    }
                }
            }
            SourceKind::FedReleases | SourceKind::FomcCalendar => {
                let Some(resp) = self.fetcher.fetch(&source.url, None).await else {
                    warn!("Fed index unavailable; moving on");
                    return None;
                };
                let max_age = self.settings.scoring.max_article_age_days;
                let Some(index) = FedIndex::new(&source.url, &self.scorer, max_age, now) else {
                    error!("Fed index URL does not parse");
                    return None;
                };
                Some(match source.kind {
                    SourceKind::FedReleases => index.press_releases(&resp.body),
                    _ => index.fomc_calendar(&resp.body),
                })
            }
        }
    }

    async fn scrape_news_api(&self, now: DateTime<Utc>) -> Vec<ArticleRecord> {
        let Some(url) = newsapi::search_url(&self.settings.news_api) else {
            debug!("No news API key; skipping API search");
            return Vec::new();
        };
        let Some(resp) = self.fetcher.fetch(&url, Some(accept_headers("application/json"))).await else {
            warn!("News API unavailable");
            return Vec::new();
        };
        match newsapi::parse_response(&resp.body) {
            Ok(entries) => newsapi::api_records(entries, &self.scorer, now),
            Err(e) => {
                error!(error = %e, "News API response rejected");
                Vec::new()
            }
        }
    }

    async fn scrape_price(&self, now: DateTime<Utc>) -> Option<ArticleRecord> {
        let settings = &self.settings.price;
        if !settings.enabled {
            return None;
        }
        let Some(resp) = self.fetcher.fetch(&settings.chart_url, Some(accept_headers("application/json"))).await else {
            warn!("Price chart unavailable");
            return None;
        };
        match price::parse_chart(&resp.body) {
            Ok(snapshot) => price::snapshot_record(&snapshot, settings, &self.scorer, now),
            Err(e) => {
                error!(error = %e, "Price chart rejected");
                None
            }
        }
    }

    /// Keep records fit for the store, first copy of each link only.
    pub fn admit(&self, records: Vec<ArticleRecord>, now: DateTime<Utc>) -> Vec<ArticleRecord> {
        let scoring = &self.settings.scoring;
        let before = records.len();
        let admitted: Vec<ArticleRecord> = records
            .into_iter()
            .filter(|r| {
                let keep = !r.title.trim().is_empty()
                    && !r.link.trim().is_empty()
                    && r.score >= scoring.min_score
                    && !is_advert(&r.title)
                    && is_recent(&r.publication_date, now, scoring.max_article_age_days);
                if !keep {
                    debug!(title = %r.title, score = r.score, date = %r.publication_date, "Not admitted");
                }
                keep
            })
            .unique_by(|r| r.link.clone())
            .collect();
        info!(before, admitted = admitted.len(), "Admission filter applied");
        admitted
    }

    async fn known_links(&self) -> HashSet<String> {
        match self.store.load().await {
            Ok(records) => records.into_iter().map(|r| r.link).collect(),
            Err(e) => {
                warn!(error = %e, "Could not read store to skip known articles");
                HashSet::new()
            }
        }
    }

    /// Fetch bodies for records that have none and are not in `known`.
    ///
    /// Returns the records and how many were enriched.
    #[instrument(level = "info", skip_all, fields(records = records.len()))]
    pub async fn enrich(&self, records: Vec<ArticleRecord>, known: &HashSet<String>) -> (Vec<ArticleRecord>, usize) {
        let todo: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.content.is_empty() && !known.contains(&r.link))
            .map(|(i, _)| i)
            .collect();
        let last = todo.last().copied();

        let results: Vec<(ArticleRecord, bool)> = stream::iter(records.into_iter().enumerate())
            .then(|(i, record)| {
                let wanted = todo.contains(&i);
                async move {
                    if !wanted || self.shutdown.is_triggered() {
                        return (record, false);
                    }
                    let enriched = self.enrich_one(record).await;
                    if Some(i) != last {
                        self.pause(0.5).await;
                    }
                    enriched
                }
            })
            .collect()
            .await;

        let count = results.iter().filter(|(_, done)| *done).count();
        info!(enriched = count, "Content pass finished");
        (results.into_iter().map(|(r, _)| r).collect(), count)
    }

    async fn enrich_one(&self, mut record: ArticleRecord) -> (ArticleRecord, bool) {
        if record.link.to_lowercase().ends_with(".pdf") {
            debug!(link = %record.link, "Skipping PDF");
            return (record, false);
        }

        match self.fetcher.fetch(&record.link, None).await {
            Some(resp) => {
                let domain = source_domain(&record.link).unwrap_or_default();
                let extracted = extract_content(
                    &resp.body,
                    &domain,
                    &self.registry,
                    self.settings.content.min_length,
                );
                record.is_paywalled = extracted.is_paywalled;
                if record.summary.is_none() {
                    record.summary = extracted.summary;
                }
                record.content = extracted.content;
                debug!(link = %record.link, chars = record.content.len(), paywalled = record.is_paywalled, "Article enriched");
                (record, true)
            }
            None if self.fetcher.was_denied(&record.link) => {
                warn!(link = %record.link, "Access denied; marking paywalled");
                record.is_paywalled = true;
                (record, true)
            }
            None => {
                warn!(link = %record.link, "Article body unavailable");
                (record, false)
            }
        }
    }

    /// Apply retention and size limits to the store without scraping.
    #[instrument(level = "info", skip_all)]
    pub async fn prune(&self) -> Result<MergeSummary, Box<dyn Error>> {
        let _lock = self.store.lock()?;
        Ok(self.store.merge_and_write(Vec::new(), Utc::now()).await?)
    }

    /// Fetch bodies for stored records that still have none.
    #[instrument(level = "info", skip_all)]
    pub async fn backfill(&self) -> Result<usize, Box<dyn Error>> {
        let _lock = self.store.lock()?;
        self.fetcher.begin_run();
        let records = self.store.load().await?;
        let (records, enriched) = self.enrich(records, &HashSet::new()).await;
        self.store.write(&records).await?;
        info!(enriched, total = records.len(), "Backfill complete");
        Ok(enriched)
    }

    /// Sleep `base_delay × (floor + U[0,1))`.
    async fn pause(&self, floor: f64) {
        let factor = floor + rand::rng().random::<f64>();
        let delay = self.settings.request.base_delay().mul_f64(factor);
        debug!(?delay, "Pausing between requests");
        sleep(delay).await;
    }
}

fn accept_headers(accept: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::mock::{MockTransport, Reply};
    use chrono::Duration;
    use std::path::Path;

    const PAGE: &str = "https://example.com/market/";
    const ARTICLE: &str = "https://example.com/news/gold-hits-record";
    const FEED: &str = "https://feeds.example/rss";
    const DOWN: &str = "https://down.example/";

    const PAGE_HTML: &str = r#"<html><body>
        <article><h3><a href="/news/gold-hits-record">Gold hits record high on safe-haven demand</a></h3></article>
        <div class="item"><a href="/shop">Buy gold coins now at our shop</a></div>
        </body></html>"#;

    const FEED_XML: &str = r#"<rss><channel><item>
        <title>Gold price steadies as central bank buying continues</title>
        <link>https://feeds.example/a</link>
        <description>Bullion held near highs.</description>
        </item></channel></rss>"#;

    fn article_html() -> String {
        format!("<html><body><article><p>{}</p></article></body></html>", vec!["Bullion"; 60].join(" "))
    }

    fn settings(dir: &Path, sources: Vec<Source>) -> Settings {
        let mut s = Settings::default();
        s.sources = sources;
        s.store.path = dir.join("news_db.json");
        s.request.base_delay_ms = 1000;
        s.price.enabled = false;
        s
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_isolates_failures_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new()
            .on(PAGE, vec![Reply::ok(PAGE_HTML)])
            .on(ARTICLE, vec![Reply::ok(&article_html())])
            .on(FEED, vec![Reply::ok(FEED_XML)])
            .on(DOWN, vec![Reply::Status(404, String::new())]);
        let s = settings(
            dir.path(),
            vec![Source::page(DOWN), Source::page(PAGE), Source::feed(FEED)],
        );
        let pipeline = Pipeline::new(transport, s, Shutdown::new());

        let report = pipeline.scrape().await.unwrap();
        assert_eq!(report.sources_attempted, 3);
        assert_eq!(report.sources_failed, 1);
        assert_eq!(report.admitted, 2, "advert link is filtered out");
        assert_eq!(report.enriched, 1, "feed record already has content");
        assert_eq!(report.accepted, 2);
        assert!(!report.interrupted);

        let stored = pipeline.store.load().await.unwrap();
        assert_eq!(stored.len(), 2);
        let page = stored.iter().find(|r| r.link == ARTICLE).unwrap();
        assert!(page.content.starts_with("Bullion Bullion"));
        assert!(!page.is_paywalled);
        assert!(!dir.path().join("news_db.json.lock").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_skips_known_articles() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new()
            .on(PAGE, vec![Reply::ok(PAGE_HTML)])
            .on(ARTICLE, vec![Reply::ok(&article_html())]);
        let pipeline = Pipeline::new(transport, settings(dir.path(), vec![Source::page(PAGE)]), Shutdown::new());

        pipeline.scrape().await.unwrap();
        let report = pipeline.scrape().await.unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.total, 1);
        assert_eq!(pipeline.fetcher_calls(ARTICLE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_article_is_marked_paywalled() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new()
            .on(PAGE, vec![Reply::ok(PAGE_HTML)])
            .on(ARTICLE, vec![Reply::Status(403, String::new())]);
        let pipeline = Pipeline::new(transport, settings(dir.path(), vec![Source::page(PAGE)]), Shutdown::new());

        pipeline.scrape().await.unwrap();
        let stored = pipeline.store.load().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_paywalled);
        assert!(stored[0].content.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_before_sources_but_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Shutdown::new();
        let transport = MockTransport::new().on(PAGE, vec![Reply::ok(PAGE_HTML)]);
        let pipeline = Pipeline::new(transport, settings(dir.path(), vec![Source::page(PAGE)]), shutdown.clone());
        shutdown.trigger();

        let report = pipeline.scrape().await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.sources_attempted, 0);
        assert_eq!(pipeline.fetcher_calls(PAGE), 0);
        assert!(dir.path().join("news_db.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_content_pass_skips_remaining_articles() {
        let dir = tempfile::tempdir().unwrap();
        let articles = [
            "https://example.com/news/gold-a",
            "https://example.com/news/gold-b",
            "https://example.com/news/gold-c",
        ];
        let page = r#"<html><body>
            <article><h3><a href="/news/gold-a">Gold hits record high on safe-haven demand</a></h3></article>
            <article><h3><a href="/news/gold-b">Gold price surges past resistance</a></h3></article>
            <article><h3><a href="/news/gold-c">Gold rally extends into a third week</a></h3></article>
            </body></html>"#;
        let mut transport = MockTransport::new().on(PAGE, vec![Reply::ok(page)]);
        for link in articles {
            transport = transport.on(link, vec![Reply::ok(&article_html())]);
        }
        let shutdown = Shutdown::new();
        let pipeline = Pipeline::new(transport, settings(dir.path(), vec![Source::page(PAGE)]), shutdown.clone());

        // The first article is fetched at once; the next waits out a pause of at least 500ms.
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            sleep(std::time::Duration::from_millis(250)).await;
            trigger.trigger();
        });

        let report = pipeline.scrape().await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.admitted, 3);
        assert_eq!(report.enriched, 1);
        let fetched: usize = articles.iter().map(|a| pipeline.fetcher_calls(a)).sum();
        assert_eq!(fetched, 1);

        let stored = pipeline.store.load().await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored.iter().filter(|r| r.content.is_empty()).count(), 2);
        assert!(!dir.path().join("news_db.json.lock").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fed_indexes_and_price_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let releases = "https://www.federalreserve.gov/newsevents/pressreleases.htm";
        let calendar = "https://www.federalreserve.gov/monetarypolicy/fomccalendars.htm";
        let chart = "https://query1.finance.yahoo.com/v8/finance/chart/GC=F";
        let today = Utc::now().format("%m/%d/%Y").to_string();
        let releases_html = format!(
            r#"<div id="article"><div class="row item"><div class="col-xs-2">{today}</div>
               <div class="col-xs-10"><a href="/newsevents/pressreleases/monetary.htm">Federal Reserve issues FOMC statement</a></div></div></div>"#
        );
        let transport = MockTransport::new()
            .on(releases, vec![Reply::ok(&releases_html)])
            .on(calendar, vec![Reply::ok("<html><body>calendar moved</body></html>")])
            .on(chart, vec![Reply::ok(
                r#"{"chart":{"result":[{"meta":{"regularMarketPrice":2350.5,"previousClose":2340.0}}],"error":null}}"#,
            )]);
        let mut s = settings(
            dir.path(),
            vec![
                Source::new(releases, SourceKind::FedReleases),
                Source::new(calendar, SourceKind::FomcCalendar),
            ],
        );
        s.price.enabled = true;
        s.content.fetch = false;
        let pipeline = Pipeline::new(transport, s, Shutdown::new());

        let report = pipeline.scrape().await.unwrap();
        assert_eq!(report.sources_failed, 0);
        assert_eq!(report.admitted, 2);

        let stored = pipeline.store.load().await.unwrap();
        let fed = stored.iter().find(|r| r.source == "federalreserve.gov").unwrap();
        assert_eq!(fed.link, "https://www.federalreserve.gov/newsevents/pressreleases/monetary.htm");
        let snapshot = stored.iter().find(|r| r.title.starts_with("Gold Price Update")).unwrap();
        assert!(snapshot.extra.contains_key("data"));
        assert_eq!(pipeline.fetcher_calls(chart), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_store_refuses_to_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(MockTransport::new(), settings(dir.path(), vec![]), Shutdown::new());
        let _held = pipeline.store.lock().unwrap();
        assert!(pipeline.scrape().await.is_err());
    }

    #[test]
    fn test_admission_filter() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(MockTransport::new(), settings(dir.path(), vec![]), Shutdown::new());
        let now = Utc::now();
        let make = |title: &str, link: &str, score: f64, date: &str| {
            let mut r = ArticleRecord::skeleton(title.into(), link.into(), "example.com".into(), date.into());
            r.score = score;
            r
        };
        let old = (now - Duration::days(30)).format("%Y-%m-%d").to_string();
        let records = vec![
            make("Gold climbs", "https://e.com/1", 12.0, "whenever"),
            make("Gold climbs again", "https://e.com/1", 12.0, ""),
            make("Gold dips", "https://e.com/2", 4.0, ""),
            make("Order now: gold bars", "https://e.com/3", 12.0, ""),
            make("Gold last month", "https://e.com/4", 12.0, &old),
            make("", "https://e.com/5", 12.0, ""),
            make("Gold without link", "", 12.0, ""),
        ];
        let admitted = pipeline.admit(records, now);
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].title, "Gold climbs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_and_backfill() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new().on(ARTICLE, vec![Reply::ok(&article_html())]);
        let pipeline = Pipeline::new(transport, settings(dir.path(), vec![]), Shutdown::new());

        let fresh = ArticleRecord::skeleton(
            "Gold hits record".into(),
            ARTICLE.into(),
            "example.com".into(),
            "2025-05-06".into(),
        );
        let mut stale = fresh.clone();
        stale.link = "https://example.com/old".into();
        stale.fetched_at = Utc::now() - Duration::days(20);
        let mut pdf = fresh.clone();
        pdf.link = "https://example.com/report.pdf".into();
        pipeline.store.write(&[fresh, stale, pdf]).await.unwrap();

        let summary = pipeline.prune().await.unwrap();
        assert_eq!(summary.total, 2);

        let enriched = pipeline.backfill().await.unwrap();
        assert_eq!(enriched, 1);
        let stored = pipeline.store.load().await.unwrap();
        let article = stored.iter().find(|r| r.link == ARTICLE).unwrap();
        assert!(!article.content.is_empty());
        assert_eq!(pipeline.fetcher_calls("https://example.com/report.pdf"), 0);
    }

    impl Pipeline<MockTransport> {
        fn fetcher_calls(&self, url: &str) -> usize {
            self.fetcher.transport().calls_to(url).len()
        }
    }
}
