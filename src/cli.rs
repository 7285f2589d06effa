//! Command-line interface definitions for Gold Spider.
//!
//! Flags given here take precedence over the YAML settings file. The API key
//! can also come from the environment.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Fetch every source, enrich, and merge into the store.
    Scrape,
    /// Apply retention and size limits to the store only.
    Prune,
    /// Fetch bodies for stored articles that have none.
    Backfill,
}

/// Command-line arguments for Gold Spider.
///
/// # Examples
///
/// ```sh
/// # One scrape run with built-in settings
/// gold_spider
///
/// # Custom settings, through proxies, without article bodies
/// gold_spider -c config.yaml --use-proxies --no-content
///
/// # Trim the store in place
/// gold_spider --mode prune -s data/news_db.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a config.yaml file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path of the JSON store (overrides the config file)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    /// Route requests through the rotating proxy pool
    #[arg(long)]
    pub use_proxies: bool,

    /// Skip fetching article bodies
    #[arg(long)]
    pub no_content: bool,

    /// What to do this run
    #[arg(short, long, value_enum, default_value_t = Mode::Scrape)]
    pub mode: Mode,

    /// NewsAPI key; the API source is skipped without one
    #[arg(long, env = "NEWS_API_KEY")]
    pub news_api_key: Option<String>,
}
