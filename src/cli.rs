//! Command-line interface definitions.
//!
//! Every option can also be provided through an environment variable.

use clap::Parser;
use std::path::PathBuf;

/// Ingest the configured RSS/Atom feeds into the article store.
///
/// # Examples
///
/// ```sh
/// # One ingestion pass with the defaults (flux.json -> rss_feed.db)
/// fluxeli_ingest
///
/// # Four host lanes, keep a week of articles, write a JSON report
/// fluxeli_ingest --workers 4 --retention-days 7 --report-json report.json
///
/// # Read-only: show the 20 latest English articles
/// fluxeli_ingest --skip-ingest --list 20 --lang en
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Feed list file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long, env = "FLUX_FEEDS", default_value = "flux.json")]
    pub feeds: PathBuf,

    /// SQLite database file
    #[arg(short, long, env = "FLUX_DB", default_value = "rss_feed.db")]
    pub database: PathBuf,

    /// Delete articles published more than this many days ago
    #[arg(long, env = "FLUX_RETENTION_DAYS", default_value_t = 30)]
    pub retention_days: u32,

    /// Per-request timeout in seconds
    #[arg(long, env = "FLUX_TIMEOUT_SECS", default_value_t = 20)]
    pub timeout_secs: u64,

    /// Retries for transient fetch failures
    #[arg(long, env = "FLUX_RETRIES", default_value_t = 2)]
    pub retries: usize,

    /// Number of hosts fetched concurrently (1 = strictly sequential)
    #[arg(short, long, env = "FLUX_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Language assigned to feeds listed without one
    #[arg(long, env = "FLUX_DEFAULT_LANG", default_value = "fr")]
    pub default_lang: String,

    /// Minimum delay before each fetch, in milliseconds
    #[arg(long, env = "FLUX_PACE_MIN_MS", default_value_t = 500)]
    pub pace_min_ms: u64,

    /// Maximum delay before each fetch, in milliseconds
    #[arg(long, env = "FLUX_PACE_MAX_MS", default_value_t = 1500)]
    pub pace_max_ms: u64,

    /// Print the N most recent articles after the run
    #[arg(long)]
    pub list: Option<i64>,

    /// Restrict --list to one language
    #[arg(long)]
    pub lang: Option<String>,

    /// Oldest first for --list
    #[arg(long)]
    pub ascending: bool,

    /// Print the latest N articles of every category and language
    #[arg(long)]
    pub trending: Option<i64>,

    /// Do not fetch anything; only run the read-side options
    #[arg(long)]
    pub skip_ingest: bool,

    /// Write the batch report as JSON to this file
    #[arg(long, env = "FLUX_REPORT_JSON")]
    pub report_json: Option<PathBuf>,
}
