//! Data models shared by the fetcher, parser, store and pipeline.
//!
//! - [`FeedSource`]: one configured (category, language, URL) tuple
//! - [`RawEntry`]: an entry as found in a feed payload, before normalization
//! - [`ParsedFeed`]: the entries of one payload plus an optional bozo note
//! - [`Article`]: the normalized record persisted in the `articles` table

use serde::{Deserialize, Serialize};

/// One feed to fetch, derived from the feed list configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    /// Human label of the category in this source's language.
    pub category: String,
    /// Stable machine key shared by all languages of a category.
    pub category_slug: String,
    pub lang: String,
    pub url: String,
}

/// An entry exactly as extracted from the feed XML.
///
/// Every field is optional: feeds in the wild omit any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    /// Description or summary markup, possibly HTML.
    pub description: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
}

/// The result of parsing one feed payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub entries: Vec<RawEntry>,
    /// Set when the payload was malformed but some entries were recovered.
    pub bozo: Option<String>,
}

/// A normalized article.
///
/// `id` is `None` until the row has been read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: Option<i64>,
    pub title: String,
    pub url: String,
    /// Sanitized plain text, at most 500 characters.
    pub short_description: String,
    /// ISO-8601 UTC instant with a literal `Z` suffix.
    pub published_at: String,
    pub category: String,
    pub category_slug: String,
    pub lang: String,
}
