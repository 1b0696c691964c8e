//! Per-feed and per-batch ingestion results.

use crate::error::{FetchFailure, ParseFailure};
use crate::models::FeedSource;
use crate::parser::normalize::SkipReason;
use crate::store::CategoryLangCount;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// What happened to one entry of a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    Inserted { url: String },
    Duplicate { url: String },
    Skipped { reason: SkipReason },
}

/// Why a whole feed produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum FailureReason {
    Fetch(FetchFailure),
    EmptyFeed,
    Parse(ParseFailure),
    Store(String),
}

impl FailureReason {
    /// Grouping used by the summary: network problems vs. unusable content.
    pub fn category(&self) -> &'static str {
        match self {
            FailureReason::Fetch(_) => "fetch",
            FailureReason::EmptyFeed | FailureReason::Parse(_) => "empty/error",
            FailureReason::Store(_) => "store",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Fetch(e) => write!(f, "fetch failed: {e}"),
            FailureReason::EmptyFeed => write!(f, "feed has no entries"),
            FailureReason::Parse(e) => write!(f, "{e}"),
            FailureReason::Store(e) => write!(f, "store failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFeed {
    pub url: String,
    pub lang: String,
    pub category_slug: String,
    pub reason: FailureReason,
}

/// Result of ingesting one feed that could be fetched and parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    pub url: String,
    pub lang: String,
    pub category_slug: String,
    pub entries: Vec<EntryOutcome>,
    /// Set when the payload was malformed but some entries were recovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bozo: Option<String>,
}

impl FeedReport {
    pub fn new(source: &FeedSource) -> Self {
        Self {
            url: source.url.clone(),
            lang: source.lang.clone(),
            category_slug: source.category_slug.clone(),
            entries: Vec::new(),
            bozo: None,
        }
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn inserted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, EntryOutcome::Inserted { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, EntryOutcome::Skipped { .. }))
            .count()
    }
}

/// Outcome of attempting one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    Ingested(FeedReport),
    Failed(FailedFeed),
}

impl FeedOutcome {
    pub fn failed(source: &FeedSource, reason: FailureReason) -> Self {
        FeedOutcome::Failed(FailedFeed {
            url: source.url.clone(),
            lang: source.lang.clone(),
            category_slug: source.category_slug.clone(),
            reason,
        })
    }
}

/// Store contents after pruning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: i64,
    pub by_language: BTreeMap<String, i64>,
    pub by_category_language: Vec<CategoryLangCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Newly inserted articles per language.
    pub new_by_lang: BTreeMap<String, usize>,
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    pub failures: Vec<FailedFeed>,
    pub feeds: Vec<FeedReport>,
    pub pruned: u64,
    pub stats: StoreStats,
    pub elapsed_ms: u128,
}

impl BatchReport {
    /// Fold one source's outcome into the batch totals.
    pub fn record(&mut self, outcome: FeedOutcome) {
        match outcome {
            FeedOutcome::Ingested(feed) => {
                *self.new_by_lang.entry(feed.lang.clone()).or_default() += feed.inserted();
                self.feeds_ok += 1;
                self.feeds.push(feed);
            }
            FeedOutcome::Failed(failed) => {
                self.feeds_failed += 1;
                self.failures.push(failed);
            }
        }
    }

    pub fn total_new(&self) -> usize {
        self.new_by_lang.values().sum()
    }

    /// Failed feeds grouped by [`FailureReason::category`].
    pub fn failures_by_category(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.reason.category()).or_default() += 1;
        }
        counts
    }
}
