//! Feed list loading.
//!
//! The feed list is an ordered array of category groups. Each group carries a
//! category slug, a display name per language and the feed URLs per
//! language:
//!
//! ```json
//! [
//!   {
//!     "slug": "technologie",
//!     "category": { "fr": "Technologie", "en": "Technology" },
//!     "feeds": {
//!       "fr": ["https://www.01net.com/feed/"],
//!       "en": ["https://www.theverge.com/rss/index.xml"]
//!     }
//!   }
//! ]
//! ```
//!
//! The older single-language shape `{"category": "Technologie", "feeds":
//! [...]}` is also accepted: the slug is derived from the name and the
//! language is the configured default. Files ending in `.yaml`/`.yml` are read
//! as YAML, everything else as JSON.

use crate::error::ConfigError;
use crate::models::FeedSource;
use crate::utils::slugify;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, instrument};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CategoryNames {
    Single(String),
    PerLanguage(IndexMap<String, String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedUrls {
    Single(Vec<String>),
    PerLanguage(IndexMap<String, Vec<String>>),
}

/// One category group of the feed list.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedGroup {
    #[serde(default)]
    pub slug: Option<String>,
    pub category: CategoryNames,
    pub feeds: FeedUrls,
}

impl FeedGroup {
    fn display_name(&self, lang: &str, fallback: &str) -> String {
        match &self.category {
            CategoryNames::Single(name) => name.clone(),
            CategoryNames::PerLanguage(names) => names
                .get(lang)
                .or_else(|| names.get(fallback))
                .or_else(|| names.values().next())
                .cloned()
                .unwrap_or_else(|| self.slug.clone().unwrap_or_default()),
        }
    }

    fn slug(&self, default_lang: &str) -> String {
        if let Some(slug) = self.slug.as_deref().filter(|s| !s.trim().is_empty()) {
            return slug.trim().to_string();
        }
        slugify(&self.display_name(default_lang, default_lang))
    }

    /// Flatten into sources. Languages and URLs keep their file order.
    fn sources(&self, default_lang: &str) -> Result<Vec<FeedSource>, ConfigError> {
        let slug = self.slug(default_lang);
        let per_lang: Vec<(&str, &Vec<String>)> = match &self.feeds {
            FeedUrls::Single(urls) => vec![(default_lang, urls)],
            FeedUrls::PerLanguage(map) => map.iter().map(|(l, u)| (l.as_str(), u)).collect(),
        };

        let mut out = Vec::new();
        for (lang, urls) in per_lang {
            let category = self.display_name(lang, default_lang);
            for url in urls {
                let url = url.trim();
                Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
                    group: slug.clone(),
                    url: url.to_string(),
                    source,
                })?;
                out.push(FeedSource {
                    category: category.clone(),
                    category_slug: slug.clone(),
                    lang: lang.to_string(),
                    url: url.to_string(),
                });
            }
        }
        Ok(out)
    }
}

/// Parse feed list text. `yaml` selects the YAML reader.
pub fn parse_feed_list(
    text: &str,
    yaml: bool,
    default_lang: &str,
) -> Result<Vec<FeedSource>, ConfigError> {
    let groups: Vec<FeedGroup> = if yaml {
        serde_yaml::from_str(text)?
    } else {
        serde_json::from_str(text)?
    };

    let mut sources = Vec::new();
    for group in &groups {
        sources.extend(group.sources(default_lang)?);
    }
    if sources.is_empty() {
        return Err(ConfigError::Empty);
    }
    Ok(sources)
}

/// Load the feed list at `path`.
///
/// # Examples
///
/// ```no_run
/// # async fn run() -> Result<(), fluxeli_ingest::error::ConfigError> {
/// use std::path::Path;
///
/// let sources = fluxeli_ingest::config::load_feed_sources(Path::new("flux.json"), "fr").await?;
/// for source in &sources {
///     println!("{} [{}] {}", source.category_slug, source.lang, source.url);
/// }
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Any failure here is fatal: the file is missing or unreadable, does not
/// match the expected shape, contains an invalid URL, or lists no feeds.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_feed_sources(
    path: &Path,
    default_lang: &str,
) -> Result<Vec<FeedSource>, ConfigError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let sources = parse_feed_list(&text, yaml, default_lang)?;
    info!(count = sources.len(), "Loaded feed sources");
    Ok(sources)
}
