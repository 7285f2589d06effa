//! # Gold Spider
//!
//! Collects gold and precious-metals market news from web pages, RSS/Atom
//! feeds and an optional news search API, scores it for relevance, and keeps a
//! bounded, deduplicated JSON collection of recent articles.
//!
//! ## Features
//!
//! - Resilient fetching: per-host browser identities, status-aware retry and
//!   backoff, optional rotating proxy pool
//! - Generic link extraction from listing pages, no per-site schema needed
//! - Keyword relevance scoring with per-source trust weights
//! - Article body extraction with paywall previews
//! - Idempotent merge into an atomically replaced, lock-guarded store
//!
//! ## Usage
//!
//! ```sh
//! gold_spider -c config.yaml
//! gold_spider --mode prune
//! ```
//!
//! ## Architecture
//!
//! One run is a sequential pass:
//! 1. **Collect**: fetch each configured source and turn it into records
//! 2. **Admit**: drop low-score, advert, stale and duplicate records
//! 3. **Enrich**: fetch article bodies for new page-derived records
//! 4. **Merge**: fold the survivors into the store and rewrite it atomically

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dates;
mod models;
mod net;
mod outputs;
mod pipeline;
mod scoring;
mod scrapers;
mod shutdown;
mod utils;

use cli::{Cli, Mode};
use config::Settings;
use net::transport::ReqwestTransport;
use pipeline::Pipeline;
use shutdown::Shutdown;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("gold_spider starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.config, ?args.store, ?args.mode, "Parsed CLI arguments");

    // --- Settings: file, then CLI overrides ---
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(store) = args.store {
        settings.store.path = store;
    }
    if args.use_proxies {
        settings.proxies.enabled = true;
    }
    if args.no_content {
        settings.content.fetch = false;
    }
    settings.news_api.api_key = args.news_api_key;

    // Early check: ensure the store directory is writable
    let store_dir = settings
        .store
        .path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    if let Err(e) = ensure_writable_dir(&store_dir).await {
        error!(
            path = %store_dir.display(),
            error = %e,
            "Store directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let shutdown = Shutdown::new();
    shutdown.listen_for_ctrl_c();
    let pipeline = Pipeline::new(ReqwestTransport::new(), settings, shutdown);

    let outcome: Result<(), Box<dyn Error>> = match args.mode {
        Mode::Scrape => pipeline.scrape().await.map(|report| {
            info!(
                sources = report.sources_attempted,
                failed = report.sources_failed,
                admitted = report.admitted,
                accepted = report.accepted,
                total = report.total,
                interrupted = report.interrupted,
                "Scrape finished"
            );
        }),
        Mode::Prune => pipeline.prune().await.map(|summary| {
            info!(total = summary.total, "Prune finished");
        }),
        Mode::Backfill => pipeline.backfill().await.map(|enriched| {
            info!(enriched, "Backfill finished");
        }),
    };

    let elapsed = start_time.elapsed();
    match outcome {
        Ok(()) => {
            info!(?elapsed, secs = elapsed.as_secs(), "Execution complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, ?elapsed, "Run failed; store left as it was");
            Err(e)
        }
    }
}
