//! Turn a [`RawEntry`] into an unpersisted [`Article`].
//!
//! Title and link are mandatory. Dates are converted to UTC and rendered as
//! `YYYY-MM-DDTHH:MM:SSZ`, falling back to the ingestion instant when the
//! entry has no usable date.

use crate::models::{Article, FeedSource, RawEntry};
use crate::parser::sanitize::excerpt;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::fmt;

/// Format every stored `published_at` uses.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Why an entry was not turned into an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    MissingTitle,
    MissingLink,
    /// Published before the retention horizon; it would be pruned at once.
    Expired,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingTitle => write!(f, "missing title"),
            SkipReason::MissingLink => write!(f, "missing link"),
            SkipReason::Expired => write!(f, "older than the retention window"),
        }
    }
}

/// Render a UTC instant the way the store expects it.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a feed date string.
///
/// RFC 2822 is tried first (RSS `pubDate`). Feeds regularly get the weekday
/// wrong, so a second attempt drops it. RFC 3339 covers Atom dates.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed: Option<DateTime<FixedOffset>> = DateTime::parse_from_rfc2822(raw)
        .ok()
        .or_else(|| {
            raw.split_once(',')
                .and_then(|(_, rest)| DateTime::parse_from_rfc2822(rest.trim()).ok())
        })
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok());

    parsed.map(|dt| dt.with_timezone(&Utc))
}

fn clean_inline(text: Option<&str>) -> Option<String> {
    let collapsed = text?.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Normalize one entry for `source`.
///
/// `now` is the ingestion instant used when the entry carries no usable
/// `published` or `updated` date.
pub fn normalize(
    entry: &RawEntry,
    source: &FeedSource,
    now: DateTime<Utc>,
) -> Result<Article, SkipReason> {
    let title = clean_inline(entry.title.as_deref()).ok_or(SkipReason::MissingTitle)?;
    let url = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or(SkipReason::MissingLink)?
        .to_string();

    let published = entry
        .published
        .as_deref()
        .or(entry.updated.as_deref())
        .and_then(parse_feed_date)
        .unwrap_or(now);

    Ok(Article {
        id: None,
        title,
        url,
        short_description: entry.description.as_deref().map(excerpt).unwrap_or_default(),
        published_at: format_timestamp(published),
        category: source.category.clone(),
        category_slug: source.category_slug.clone(),
        lang: source.lang.clone(),
    })
}
