//! # fluxeli_ingest
//!
//! Runs one ingestion pass over the configured feed list, then prints a
//! summary of what was inserted, what failed and what was pruned.
//!
//! ## Usage
//!
//! ```sh
//! fluxeli_ingest --feeds flux.json --database rss_feed.db
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Configuration**: a missing or malformed feed list aborts before any network activity
//! 2. **Ingestion**: fetch, parse, normalize and upsert every feed, then prune
//! 3. **Reporting**: terminal summary, optional JSON report and listings

use clap::Parser;
use fluxeli_ingest::cli::Cli;
use fluxeli_ingest::config::load_feed_sources;
use fluxeli_ingest::fetcher::{HttpFetcher, RetryFetch};
use fluxeli_ingest::outputs::{json, text};
use fluxeli_ingest::pipeline::{Pipeline, PipelineOptions};
use fluxeli_ingest::store::{SortOrder, Store};
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

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
    info!("fluxeli_ingest starting up");

    let args = Cli::parse();
    debug!(?args.feeds, ?args.database, workers = args.workers, "Parsed CLI arguments");

    // ---- Feed list (fatal) ----
    let sources = if args.skip_ingest {
        None
    } else {
        match load_feed_sources(&args.feeds, &args.default_lang).await {
            Ok(sources) => Some(sources),
            Err(e) => {
                error!(path = %args.feeds.display(), error = %e, "Cannot load feed list");
                return Err(e.into());
            }
        }
    };

    let store = Store::open(&args.database)
        .await?
        .with_default_lang(args.default_lang.clone());
    store.ensure_schema().await?;

    if let Some(sources) = sources {
        // ---- Ingestion pass ----
        let fetcher = RetryFetch::new(
            HttpFetcher::new(Duration::from_secs(args.timeout_secs))?,
            args.retries,
            Duration::from_secs(1),
        );
        let options = PipelineOptions {
            retention_days: args.retention_days,
            pace_min: Duration::from_millis(args.pace_min_ms),
            pace_max: Duration::from_millis(args.pace_max_ms),
            workers: args.workers.max(1),
        };
        let pipeline = Pipeline::new(fetcher, store.clone(), options);
        let report = pipeline.run(&sources).await?;

        print!("{}", text::batch_summary(&report));

        if let Some(path) = &args.report_json {
            if let Err(e) = json::write_report(&report, path).await {
                error!(path = %path.display(), error = %e, "Failed to write JSON report");
            }
        }
    }

    // ---- Read side ----
    if let Some(limit) = args.list {
        let order = if args.ascending {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        };
        let articles = store.list_recent(limit, args.lang.as_deref(), order).await?;
        println!("{}", text::article_list(&articles));
    }

    if let Some(per_group) = args.trending {
        let articles = store.trending(per_group).await?;
        print!("{}", text::trending_list(&articles));
    }

    store.close().await;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
