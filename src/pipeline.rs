//! The ingestion pass: fetch, parse, normalize and store every configured feed,
//! then prune and collect statistics.
//!
//! With one worker, sources are visited strictly in configured order. With
//! more, sources are grouped into per-host lanes; lanes run concurrently while
//! each lane stays sequential, so a host never sees overlapping requests.

use crate::error::StoreError;
use crate::fetcher::Fetcher;
use crate::models::{Article, FeedSource};
use crate::parser::{self, normalize::{SkipReason, format_timestamp, normalize}};
use crate::report::{BatchReport, EntryOutcome, FailureReason, FeedOutcome, FeedReport, StoreStats};
use crate::store::{Store, retention_cutoff};
use crate::utils::{host_of, truncate_for_log};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use rand::{Rng, rng};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Tunables of one ingestion pass.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Articles published more than this many days ago are pruned.
    pub retention_days: u32,
    /// Bounds of the random delay before each fetch.
    pub pace_min: Duration,
    pub pace_max: Duration,
    /// Number of host lanes processed concurrently.
    pub workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retention_days: 30,
            pace_min: Duration::from_millis(500),
            pace_max: Duration::from_millis(1500),
            workers: 1,
        }
    }
}

/// Uniform random delay in `[min, max]`.
///
/// A reversed or empty range yields `min`, so zero bounds disable pacing.
///
/// # Examples
///
/// ```ignore
/// let d = pacing_delay(Duration::from_millis(500), Duration::from_millis(1500));
/// assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
/// ```
pub fn pacing_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rng().random_range(min_ms..=max_ms))
}

/// Group sources by host, keeping each source's position in the feed list.
///
/// Lanes are ordered by the first appearance of their host.
pub fn host_lanes(sources: &[FeedSource]) -> Vec<Vec<(usize, &FeedSource)>> {
    sources
        .iter()
        .enumerate()
        .into_group_map_by(|(_, source)| host_of(&source.url))
        .into_values()
        .sorted_by_key(|lane| lane.first().map(|(i, _)| *i))
        .collect()
}

pub struct Pipeline<F> {
    fetcher: F,
    store: Store,
    options: PipelineOptions,
}

impl<F> Pipeline<F>
where
    F: Fetcher,
{
    pub fn new(fetcher: F, store: Store, options: PipelineOptions) -> Self {
        Self {
            fetcher,
            store,
            options,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run one full pass over `sources`.
    ///
    /// Per-feed problems end up in the report.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only for store failures outside a single feed's
    /// write: schema setup, pruning and statistics.
    #[instrument(level = "info", skip_all, fields(sources = sources.len(), workers = self.options.workers))]
    pub async fn run(&self, sources: &[FeedSource]) -> Result<BatchReport, StoreError> {
        let t0 = Instant::now();
        self.store.ensure_schema().await?;

        let outcomes: Vec<(usize, FeedOutcome)> = if self.options.workers <= 1 {
            self.run_lane(sources.iter().enumerate().collect()).await
        } else {
            let lanes = host_lanes(sources);
            info!(lanes = lanes.len(), "Processing host lanes concurrently");
            stream::iter(lanes)
                .map(|lane| self.run_lane(lane))
                .buffer_unordered(self.options.workers)
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .flatten()
                .sorted_by_key(|(i, _)| *i)
                .collect()
        };

        let mut report = BatchReport::default();
        for (_, outcome) in outcomes {
            report.record(outcome);
        }

        report.pruned = self.store.prune_older_than(self.options.retention_days).await?;
        report.stats = self.collect_stats().await?;
        report.elapsed_ms = t0.elapsed().as_millis();

        info!(
            new = report.total_new(),
            feeds_ok = report.feeds_ok,
            feeds_failed = report.feeds_failed,
            pruned = report.pruned,
            elapsed_ms = report.elapsed_ms as u64,
            "Ingestion pass complete"
        );
        Ok(report)
    }

    async fn run_lane<'a>(
        &self,
        lane: Vec<(usize, &'a FeedSource)>,
    ) -> Vec<(usize, FeedOutcome)> {
        let mut outcomes = Vec::with_capacity(lane.len());
        for (index, source) in lane {
            let delay = pacing_delay(self.options.pace_min, self.options.pace_max);
            if !delay.is_zero() {
                debug!(?delay, url = %source.url, "Pacing before fetch");
                sleep(delay).await;
            }
            outcomes.push((index, self.ingest_feed(source).await));
        }
        outcomes
    }

    /// Fetch, parse, normalize and store a single feed.
    ///
    /// Entries already past the retention window are reported as
    /// [`SkipReason::Expired`] and never written, so a pass never inserts
    /// what its own pruning step would delete.
    ///
    /// # Returns
    ///
    /// [`FeedOutcome::Ingested`] with one [`EntryOutcome`] per entry, or
    /// [`FeedOutcome::Failed`] when the feed could not be fetched, parsed or
    /// written. A failed write leaves nothing of this feed in the store.
    #[instrument(
        level = "info",
        skip_all,
        fields(url = %source.url, lang = %source.lang, slug = %source.category_slug)
    )]
    pub async fn ingest_feed(&self, source: &FeedSource) -> FeedOutcome {
        let body = match self.fetcher.fetch(&source.url).await {
            Ok(body) => body,
            Err(failure) => {
                warn!(error = %failure, "Fetch failed; skipping feed");
                return FeedOutcome::failed(source, FailureReason::Fetch(failure));
            }
        };

        let parsed = match parser::parse(&body) {
            Ok(parsed) => parsed,
            Err(failure) => {
                warn!(
                    error = %failure,
                    body_preview = %truncate_for_log(&String::from_utf8_lossy(&body), 200),
                    "Payload is not a feed; skipping"
                );
                return FeedOutcome::failed(source, FailureReason::Parse(failure));
            }
        };

        if parsed.entries.is_empty() {
            warn!("Feed has no entries");
            return FeedOutcome::failed(source, FailureReason::EmptyFeed);
        }
        if let Some(note) = &parsed.bozo {
            warn!(bozo = %note, entries = parsed.entries.len(), "Malformed feed; keeping recovered entries");
        }

        let now = Utc::now();
        let horizon = format_timestamp(retention_cutoff(now, self.options.retention_days));
        let normalized: Vec<_> = parsed
            .entries
            .iter()
            .map(|entry| {
                normalize(entry, source, now).and_then(|article| {
                    if article.published_at < horizon {
                        Err(SkipReason::Expired)
                    } else {
                        Ok(article)
                    }
                })
            })
            .collect();
        let articles: Vec<Article> = normalized.iter().flatten().cloned().collect();

        let inserted = match self.store.upsert_all(&articles).await {
            Ok(flags) => flags,
            Err(e) => {
                error!(error = %e, "Failed to store feed entries");
                return FeedOutcome::failed(source, FailureReason::Store(e.to_string()));
            }
        };

        let mut flags = inserted.into_iter();
        let mut feed = FeedReport::new(source);
        feed.bozo = parsed.bozo;
        feed.entries = normalized
            .into_iter()
            .map(|result| match result {
                Ok(article) if flags.next().unwrap_or(false) => {
                    EntryOutcome::Inserted { url: article.url }
                }
                Ok(article) => EntryOutcome::Duplicate { url: article.url },
                Err(reason) => {
                    debug!(%reason, "Skipping entry");
                    EntryOutcome::Skipped { reason }
                }
            })
            .collect();

        info!(
            entries = feed.total(),
            inserted = feed.inserted(),
            skipped = feed.skipped(),
            "Ingested feed"
        );
        FeedOutcome::Ingested(feed)
    }

    async fn collect_stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            total: self.store.count().await?,
            by_language: self.store.stats_by_language().await?,
            by_category_language: self.store.stats_by_category_language().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchFailure;
    use crate::parser::normalize::SkipReason;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves canned responses and records the order of requests.
    #[derive(Default)]
    struct Canned {
        responses: HashMap<String, Result<Vec<u8>, FetchFailure>>,
        requested: RefCell<Vec<String>>,
    }

    impl Canned {
        fn with(mut self, url: &str, response: Result<&str, FetchFailure>) -> Self {
            self.responses
                .insert(url.to_string(), response.map(|b| b.as_bytes().to_vec()));
            self
        }
    }

    impl Fetcher for Canned {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
            self.requested.borrow_mut().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .unwrap_or(Err(FetchFailure::HttpError { status: 404 }))
        }
    }

    fn source(slug: &str, lang: &str, url: &str) -> FeedSource {
        FeedSource {
            category: slug.to_uppercase(),
            category_slug: slug.to_string(),
            lang: lang.to_string(),
            url: url.to_string(),
        }
    }

    fn rss(items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, link)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link>\
                     <pubDate>Mon, 01 Jan 2024 10:00:00 +0000</pubDate></item>"
                )
            })
            .collect();
        format!("<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>{items}</channel></rss>")
    }

    fn no_pacing(workers: usize) -> PipelineOptions {
        PipelineOptions {
            retention_days: 36_500,
            pace_min: Duration::ZERO,
            pace_max: Duration::ZERO,
            workers,
        }
    }

    async fn pipeline(fetcher: Canned, workers: usize) -> (TempDir, Pipeline<Canned>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).await.unwrap();
        (dir, Pipeline::new(fetcher, store, no_pacing(workers)))
    }

    #[test]
    fn test_pacing_delay_bounds() {
        let min = Duration::from_millis(500);
        let max = Duration::from_millis(1500);
        for _ in 0..100 {
            let d = pacing_delay(min, max);
            assert!(d >= min && d <= max);
        }
        assert_eq!(pacing_delay(Duration::ZERO, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_host_lanes_group_and_keep_order() {
        let sources = vec![
            source("a", "en", "https://one.example/rss"),
            source("b", "en", "https://two.example/rss"),
            source("c", "fr", "https://ONE.example/atom"),
            source("d", "fr", "https://three.example/rss"),
        ];
        let lanes = host_lanes(&sources);
        let indices: Vec<Vec<usize>> = lanes
            .iter()
            .map(|lane| lane.iter().map(|(i, _)| *i).collect())
            .collect();
        assert_eq!(indices, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[tokio::test]
    async fn test_failures_are_classified_and_batch_continues() {
        let fetcher = Canned::default()
            .with("http://ok/rss", Ok(&rss(&[("A", "http://ok/a")])))
            .with("http://empty/rss", Ok("<rss><channel></channel></rss>"))
            .with("http://html/page", Ok("<html><body>nope</body></html>"))
            .with("http://slow/rss", Err(FetchFailure::Timeout));
        let (_dir, pipeline) = pipeline(fetcher, 1).await;

        let sources = vec![
            source("tech", "en", "http://missing/rss"),
            source("tech", "en", "http://empty/rss"),
            source("tech", "en", "http://html/page"),
            source("tech", "en", "http://slow/rss"),
            source("tech", "en", "http://ok/rss"),
        ];
        let report = pipeline.run(&sources).await.unwrap();

        assert_eq!(report.feeds_ok, 1);
        assert_eq!(report.feeds_failed, 4);
        assert_eq!(report.total_new(), 1);
        let reasons: Vec<_> = report.failures.iter().map(|f| f.reason.clone()).collect();
        assert_eq!(reasons[0], FailureReason::Fetch(FetchFailure::HttpError { status: 404 }));
        assert_eq!(reasons[1], FailureReason::EmptyFeed);
        assert!(matches!(reasons[2], FailureReason::Parse(_)));
        assert_eq!(reasons[3], FailureReason::Fetch(FetchFailure::Timeout));
        assert_eq!(report.stats.total, 1);
    }

    #[tokio::test]
    async fn test_sequential_run_follows_configured_order() {
        let fetcher = Canned::default()
            .with("http://b/rss", Ok(&rss(&[("B", "http://b/1")])))
            .with("http://a/rss", Ok(&rss(&[("A", "http://a/1")])));
        let (_dir, pipeline) = pipeline(fetcher, 1).await;

        let sources = vec![
            source("x", "fr", "http://b/rss"),
            source("x", "fr", "http://a/rss"),
            source("x", "en", "http://b/rss"),
        ];
        pipeline.run(&sources).await.unwrap();
        assert_eq!(
            *pipeline.fetcher.requested.borrow(),
            ["http://b/rss", "http://a/rss", "http://b/rss"]
        );
    }

    #[tokio::test]
    async fn test_entry_outcomes_and_rerun() {
        let body = rss(&[("A", "http://x/a"), ("", "http://x/noname"), ("A again", "http://x/a")]);
        let fetcher = Canned::default().with("http://x/rss", Ok(&body));
        let (_dir, pipeline) = pipeline(fetcher, 1).await;
        let sources = vec![source("tech", "en", "http://x/rss")];

        let first = pipeline.run(&sources).await.unwrap();
        assert_eq!(
            first.feeds[0].entries,
            vec![
                EntryOutcome::Inserted { url: "http://x/a".into() },
                EntryOutcome::Skipped { reason: SkipReason::MissingTitle },
                EntryOutcome::Duplicate { url: "http://x/a".into() },
            ]
        );
        assert_eq!(first.new_by_lang["en"], 1);

        let second = pipeline.run(&sources).await.unwrap();
        assert_eq!(second.total_new(), 0);
        assert_eq!(second.stats.total, 1);
    }

    #[tokio::test]
    async fn test_concurrent_lanes_match_sequential_totals() {
        let make = || {
            Canned::default()
                .with("http://one/rss", Ok(&rss(&[("1", "http://one/1"), ("2", "http://one/2")])))
                .with("http://one/atom", Ok(&rss(&[("3", "http://one/3")])))
                .with("http://two/rss", Ok(&rss(&[("4", "http://two/4")])))
        };
        let sources = vec![
            source("a", "en", "http://one/rss"),
            source("a", "fr", "http://two/rss"),
            source("b", "en", "http://one/atom"),
            source("b", "fr", "http://nowhere/rss"),
        ];

        let (_d1, sequential) = pipeline(make(), 1).await;
        let (_d2, concurrent) = pipeline(make(), 4).await;
        let seq = sequential.run(&sources).await.unwrap();
        let con = concurrent.run(&sources).await.unwrap();

        assert_eq!(seq.new_by_lang, con.new_by_lang);
        assert_eq!(seq.feeds_ok, con.feeds_ok);
        assert_eq!(seq.feeds_failed, con.feeds_failed);
        assert_eq!(seq.stats, con.stats);
        let urls: Vec<_> = con.feeds.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(urls, ["http://one/rss", "http://two/rss", "http://one/atom"]);
    }

    #[tokio::test]
    async fn test_bozo_feed_keeps_recovered_entries() {
        let body = "<rss><channel><item><title>A</title><link>http://x/a</link></item>\
                    <item><title>B</title><link>http://x/b</link></item>\
                    <item><title>C</title></channel></rss>";
        let fetcher = Canned::default().with("http://x/rss", Ok(body));
        let (_dir, pipeline) = pipeline(fetcher, 1).await;

        let report = pipeline.run(&[source("tech", "en", "http://x/rss")]).await.unwrap();
        assert_eq!(report.feeds_ok, 1);
        assert!(report.feeds[0].bozo.is_some());
        assert_eq!(report.total_new(), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_skipped_at_default_retention() {
        let body = "<rss><channel>\
                    <item><title>Old</title><link>http://x/old</link>\
                    <pubDate>Mon, 01 Jan 2024 10:00:00 +0000</pubDate></item>\
                    <item><title>Fresh</title><link>http://x/fresh</link></item>\
                    </channel></rss>";
        let fetcher = Canned::default().with("http://x/rss", Ok(body));
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).await.unwrap();
        let options = PipelineOptions {
            pace_min: Duration::ZERO,
            pace_max: Duration::ZERO,
            ..PipelineOptions::default()
        };
        let pipeline = Pipeline::new(fetcher, store, options);
        let sources = [source("tech", "en", "http://x/rss")];

        let first = pipeline.run(&sources).await.unwrap();
        assert_eq!(
            first.feeds[0].entries,
            vec![
                EntryOutcome::Skipped { reason: SkipReason::Expired },
                EntryOutcome::Inserted { url: "http://x/fresh".into() },
            ]
        );
        assert_eq!(first.total_new(), 1);
        assert_eq!(first.pruned, 0);

        let second = pipeline.run(&sources).await.unwrap();
        assert_eq!(second.total_new(), 0);
        assert_eq!(second.pruned, 0);
        assert_eq!(second.stats.total, 1);
    }

    #[tokio::test]
    async fn test_store_failure_rolls_back_one_feed_only() {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};

        let rejected = rss(&[("Kept?", "http://bad/1"), ("Rejected", "http://reject/2")]);
        let fetcher = Canned::default()
            .with("http://bad/rss", Ok(&rejected))
            .with("http://good/rss", Ok(&rss(&[("Good", "http://good/1")])));
        let (dir, pipeline) = pipeline(fetcher, 1).await;
        pipeline.store().ensure_schema().await.unwrap();

        let side = SqlitePool::connect_with(
            SqliteConnectOptions::new().filename(dir.path().join("test.db")),
        )
        .await
        .unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_urls BEFORE INSERT ON articles
             WHEN NEW.url LIKE 'http://reject/%'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&side)
        .await
        .unwrap();
        side.close().await;

        let report = pipeline
            .run(&[
                source("tech", "en", "http://bad/rss"),
                source("tech", "en", "http://good/rss"),
            ])
            .await
            .unwrap();

        assert_eq!(report.feeds_failed, 1);
        assert_eq!(report.failures[0].url, "http://bad/rss");
        assert!(matches!(report.failures[0].reason, FailureReason::Store(_)));
        assert_eq!(report.feeds_ok, 1);
        assert_eq!(report.total_new(), 1);

        let stored = pipeline
            .store()
            .list_recent(10, None, crate::store::SortOrder::Desc)
            .await
            .unwrap();
        let urls: Vec<_> = stored.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, ["http://good/1"]);
    }
}
