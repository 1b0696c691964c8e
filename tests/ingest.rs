use chrono::{DateTime, Utc};
use fluxeli_ingest::error::FetchFailure;
use fluxeli_ingest::fetcher::{HttpFetcher, RetryFetch};
use fluxeli_ingest::models::FeedSource;
use fluxeli_ingest::pipeline::{Pipeline, PipelineOptions};
use fluxeli_ingest::report::FailureReason;
use fluxeli_ingest::store::{SortOrder, Store};
use std::time::Duration;
use tempfile::TempDir;

const TECH_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Tech</title>
    <item>
      <title>Dated entry</title>
      <link>https://news.example.com/dated</link>
      <description><![CDATA[<p>Some <b>news</b> <img src="pic.png"></p>]]></description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Undated entry</title>
      <link>https://news.example.com/undated</link>
    </item>
  </channel>
</rss>"#;

fn tech_source(url: String) -> FeedSource {
    FeedSource {
        category: "Technology".to_string(),
        category_slug: "tech".to_string(),
        lang: "en".to_string(),
        url,
    }
}

fn options() -> PipelineOptions {
    PipelineOptions {
        retention_days: 36_500,
        pace_min: Duration::ZERO,
        pace_max: Duration::ZERO,
        workers: 1,
    }
}

async fn pipeline() -> (TempDir, Pipeline<RetryFetch<HttpFetcher>>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("rss_feed.db")).await.unwrap();
    let fetcher = RetryFetch::new(
        HttpFetcher::new(Duration::from_secs(5)).unwrap(),
        1,
        Duration::from_millis(10),
    );
    (dir, Pipeline::new(fetcher, store, options()))
}

#[tokio::test]
async fn dated_and_undated_entries_are_stored() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(TECH_FEED)
        .create_async()
        .await;

    let (_dir, pipeline) = pipeline().await;
    let before = Utc::now();
    let report = pipeline
        .run(&[tech_source(format!("{}/feed", server.url()))])
        .await
        .unwrap();
    let after = Utc::now();
    mock.assert_async().await;

    assert_eq!(report.new_by_lang["en"], 2);
    assert_eq!(report.feeds_ok, 1);
    assert_eq!(report.stats.by_language["en"], 2);

    let stored = pipeline
        .store()
        .list_recent(10, Some("en"), SortOrder::Asc)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);

    let dated = &stored[0];
    assert_eq!(dated.url, "https://news.example.com/dated");
    assert_eq!(dated.published_at, "2024-01-01T10:00:00Z");
    assert_eq!(dated.short_description, "Some news");
    assert_eq!(dated.category_slug, "tech");

    let undated = &stored[1];
    assert!(undated.published_at.ends_with('Z'));
    let stamped: DateTime<Utc> = undated.published_at.parse().unwrap();
    assert!(stamped.timestamp() >= before.timestamp());
    assert!(stamped.timestamp() <= after.timestamp());
}

#[tokio::test]
async fn not_found_feed_is_reported_and_batch_continues() {
    let mut server = mockito::Server::new_async().await;
    let missing = server
        .mock("GET", "/gone")
        .with_status(404)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body(TECH_FEED)
        .create_async()
        .await;

    let (_dir, pipeline) = pipeline().await;
    let gone = tech_source(format!("{}/gone", server.url()));
    let report = pipeline
        .run(&[gone.clone(), tech_source(format!("{}/feed", server.url()))])
        .await
        .unwrap();

    // 404 is permanent: exactly one request, no retry.
    missing.assert_async().await;
    ok.assert_async().await;

    assert_eq!(report.feeds_failed, 1);
    assert_eq!(report.failures[0].url, gone.url);
    assert_eq!(
        report.failures[0].reason,
        FailureReason::Fetch(FetchFailure::HttpError { status: 404 })
    );
    assert_eq!(report.feeds_ok, 1);
    assert_eq!(report.stats.total, 2);
}

#[tokio::test]
async fn second_identical_run_inserts_nothing() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body(TECH_FEED)
        .expect(2)
        .create_async()
        .await;

    let (_dir, pipeline) = pipeline().await;
    let sources = [tech_source(format!("{}/feed", server.url()))];

    let first = pipeline.run(&sources).await.unwrap();
    let count_after_first = pipeline.store().count().await.unwrap();
    let second = pipeline.run(&sources).await.unwrap();
    mock.assert_async().await;

    assert_eq!(first.total_new(), 2);
    assert_eq!(second.total_new(), 0);
    assert_eq!(second.feeds_ok, 1);
    assert_eq!(pipeline.store().count().await.unwrap(), count_after_first);
}

#[tokio::test]
async fn default_retention_never_inserts_expired_entries() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/feed")
        .with_status(200)
        .with_body(TECH_FEED)
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("rss_feed.db")).await.unwrap();
    let fetcher = RetryFetch::new(
        HttpFetcher::new(Duration::from_secs(5)).unwrap(),
        0,
        Duration::from_millis(10),
    );
    let pipeline = Pipeline::new(
        fetcher,
        store,
        PipelineOptions {
            retention_days: 30,
            ..options()
        },
    );
    let sources = [tech_source(format!("{}/feed", server.url()))];

    // The 2024 entry is already outside the 30-day window.
    let first = pipeline.run(&sources).await.unwrap();
    assert_eq!(first.total_new(), 1);
    assert_eq!(first.feeds[0].skipped(), 1);
    assert_eq!(first.pruned, 0);

    let second = pipeline.run(&sources).await.unwrap();
    mock.assert_async().await;
    assert_eq!(second.total_new(), 0);
    assert_eq!(second.pruned, 0);
    assert_eq!(second.stats.total, 1);
}
