//! SQLite persistence for articles.
//!
//! The [`Store`] owns its connection pool; open it once at startup and
//! [`close`](Store::close) it at shutdown. URL uniqueness is enforced by the
//! table's `UNIQUE` constraint, so concurrent upserts of the same URL can never
//! both report an insert.

use crate::error::StoreError;
use crate::models::Article;
use crate::parser::normalize::{format_timestamp, parse_feed_date};
use crate::utils::slugify;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Sqlite};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        url TEXT NOT NULL UNIQUE,
        short_description TEXT NOT NULL DEFAULT '',
        published_at TEXT NOT NULL,
        category TEXT NOT NULL,
        category_slug TEXT NOT NULL DEFAULT '',
        lang TEXT NOT NULL DEFAULT ''
    )
"#;

/// Columns added after the first table layout, with their definitions.
const LATER_COLUMNS: &[(&str, &str)] = &[
    ("category_slug", "TEXT NOT NULL DEFAULT ''"),
    ("lang", "TEXT NOT NULL DEFAULT ''"),
];

/// Shape of every well-formed `published_at` value.
const TIMESTAMP_GLOB: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9]Z";

/// Language given to legacy rows stored before `lang` existed.
pub const DEFAULT_LANG: &str = "fr";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_articles_lang ON articles(lang)",
    "CREATE INDEX IF NOT EXISTS idx_articles_slug_lang ON articles(category_slug, lang)",
    "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at DESC)",
];

const ARTICLE_COLUMNS: &str =
    "id, title, url, short_description, published_at, category, category_slug, lang";

const INSERT_ARTICLE: &str = r#"
    INSERT INTO articles (title, url, short_description, published_at, category, category_slug, lang)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(url) DO NOTHING
"#;

/// Ordering of `published_at` in list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Most recent first.
    #[default]
    Desc,
    Asc,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Desc => "DESC",
            SortOrder::Asc => "ASC",
        }
    }
}

/// Row count for one category and language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CategoryLangCount {
    pub category_slug: String,
    pub lang: String,
    pub count: i64,
}

/// A display category and its slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CategoryInfo {
    pub category: String,
    pub category_slug: String,
}

/// One page of a category listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub articles: Vec<Article>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

/// Instant before which articles fall out of a `days`-day retention window.
///
/// Shared by pruning and by the pipeline, which skips entries that would be
/// pruned right after insertion.
///
/// # Examples
///
/// ```ignore
/// let cutoff = retention_cutoff(Utc::now(), 30);
/// assert!(cutoff < Utc::now());
/// ```
pub fn retention_cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    default_lang: String,
}

impl Store {
    /// Open (creating if needed) the database file at `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(StdDuration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!("Opened article store");
        Ok(Self {
            pool,
            default_lang: DEFAULT_LANG.to_string(),
        })
    }

    /// Language assigned to legacy rows that have none.
    pub fn with_default_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_lang = lang.into();
        self
    }

    /// Close every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Create the table and indexes if missing. Safe to call on every start.
    ///
    /// Tables created by the first single-language scraper lack
    /// `category_slug` and `lang`; those columns are added in place. Their rows
    /// are then repaired: raw RFC 2822 `published_at` values are rewritten in
    /// the `YYYY-MM-DDTHH:MM:SSZ` form (unparseable or missing ones become
    /// now), empty languages get the default language and empty slugs are
    /// derived from the category name.
    ///
    /// # Errors
    ///
    /// Any SQL failure. Nothing is partially repaired: the row fixes run in one
    /// transaction.
    #[instrument(level = "info", skip_all)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.pool.execute(CREATE_TABLE).await?;

        let existing: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('articles')")
                .fetch_all(&self.pool)
                .await?;
        for (column, definition) in LATER_COLUMNS {
            if !existing.iter().any(|c| c == column) {
                info!(column, "Adding missing column to articles");
                self.pool
                    .execute(format!("ALTER TABLE articles ADD COLUMN {column} {definition}").as_str())
                    .await?;
            }
        }

        self.repair_legacy_rows().await?;

        for statement in CREATE_INDEXES {
            self.pool.execute(*statement).await?;
        }
        Ok(())
    }

    async fn repair_legacy_rows(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let bad_dates: Vec<(i64, Option<String>)> = sqlx::query_as(
            "SELECT id, published_at FROM articles
             WHERE published_at IS NULL OR published_at NOT GLOB ?",
        )
        .bind(TIMESTAMP_GLOB)
        .fetch_all(&mut *tx)
        .await?;
        let now = Utc::now();
        for (id, raw) in &bad_dates {
            let fixed = raw.as_deref().and_then(parse_feed_date).unwrap_or(now);
            sqlx::query("UPDATE articles SET published_at = ? WHERE id = ?")
                .bind(format_timestamp(fixed))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let langs = sqlx::query("UPDATE articles SET lang = ? WHERE lang IS NULL OR lang = ''")
            .bind(&self.default_lang)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let unslugged: Vec<(i64, Option<String>)> = sqlx::query_as(
            "SELECT id, category FROM articles WHERE category_slug IS NULL OR category_slug = ''",
        )
        .fetch_all(&mut *tx)
        .await?;
        for (id, category) in &unslugged {
            sqlx::query("UPDATE articles SET category_slug = ? WHERE id = ?")
                .bind(slugify(category.as_deref().unwrap_or_default()))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        if !bad_dates.is_empty() || langs > 0 || !unslugged.is_empty() {
            info!(
                dates = bad_dates.len(),
                langs,
                slugs = unslugged.len(),
                "Repaired legacy article rows"
            );
        }
        Ok(())
    }

    async fn insert<'e, E>(executor: E, article: &Article) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(INSERT_ARTICLE)
            .bind(&article.title)
            .bind(&article.url)
            .bind(&article.short_description)
            .bind(&article.published_at)
            .bind(&article.category)
            .bind(&article.category_slug)
            .bind(&article.lang)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Insert `article` unless its URL is already stored.
    ///
    /// # Returns
    ///
    /// `true` when a row was inserted, `false` for a known URL. A known URL is
    /// never updated: the first stored copy wins.
    pub async fn upsert(&self, article: &Article) -> Result<bool, StoreError> {
        Ok(Self::insert(&self.pool, article).await?)
    }

    /// Insert a feed's articles in a single transaction.
    ///
    /// The returned flags line up with `articles`. On error nothing from this
    /// call is kept.
    #[instrument(level = "debug", skip_all, fields(count = articles.len()))]
    pub async fn upsert_all(&self, articles: &[Article]) -> Result<Vec<bool>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(articles.len());
        for article in articles {
            inserted.push(Self::insert(&mut *tx, article).await?);
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Delete articles published before `cutoff`. Returns the number removed.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM articles WHERE published_at < ?")
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete articles older than `days` days.
    ///
    /// # Arguments
    ///
    /// * `days` - Retention window; the cutoff is [`retention_cutoff`] of now
    ///
    /// # Returns
    ///
    /// The number of rows removed. Zero is a normal outcome.
    #[instrument(level = "info", skip(self))]
    pub async fn prune_older_than(&self, days: u32) -> Result<u64, StoreError> {
        let cutoff = retention_cutoff(Utc::now(), days);
        let deleted = self.prune_before(cutoff).await?;
        info!(deleted, cutoff = %format_timestamp(cutoff), "Pruned old articles");
        Ok(deleted)
    }

    /// Most recent `limit` articles, optionally for a single language.
    ///
    /// # Arguments
    ///
    /// * `limit` - maximum number of rows
    /// * `lang` - restrict to one language code, or `None` for all
    /// * `order` - `Desc` for newest first, `Asc` for oldest first
    pub async fn list_recent(
        &self,
        limit: i64,
        lang: Option<&str>,
        order: SortOrder,
    ) -> Result<Vec<Article>, StoreError> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles
             WHERE (? IS NULL OR lang = ?)
             ORDER BY published_at {}, id {}
             LIMIT ?",
            order.sql(),
            order.sql()
        );
        let articles = sqlx::query_as::<_, Article>(&sql)
            .bind(lang)
            .bind(lang)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        debug!(count = articles.len(), "Listed recent articles");
        Ok(articles)
    }

    /// Article count per language.
    pub async fn stats_by_language(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT lang, COUNT(*) FROM articles GROUP BY lang ORDER BY lang")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Article count per category and language, ordered by slug then language.
    pub async fn stats_by_category_language(&self) -> Result<Vec<CategoryLangCount>, StoreError> {
        let rows = sqlx::query_as::<_, CategoryLangCount>(
            "SELECT category_slug, lang, COUNT(*) AS count
             FROM articles
             GROUP BY category_slug, lang
             ORDER BY category_slug, lang",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Distinct categories, alphabetically.
    pub async fn categories(&self) -> Result<Vec<CategoryInfo>, StoreError> {
        Ok(sqlx::query_as::<_, CategoryInfo>(
            "SELECT DISTINCT category, category_slug FROM articles ORDER BY category ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Page `page` (1-based) of a category, most recent first.
    ///
    /// # Arguments
    ///
    /// * `slug` - Category slug to list
    /// * `limit` - Page size, at least 1
    /// * `page` - 1-based page number; lower values are read as 1
    ///
    /// # Returns
    ///
    /// The page's articles plus the category total and page count. A page past
    /// the end has no articles but still reports the totals.
    pub async fn page_by_category(
        &self,
        slug: &str,
        limit: i64,
        page: i64,
    ) -> Result<Page, StoreError> {
        let limit = limit.max(1);
        let page = page.max(1);

        let articles = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles
             WHERE category_slug = ?
             ORDER BY published_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(slug)
        .bind(limit)
        .bind((page - 1) * limit)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE category_slug = ?")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;

        Ok(Page {
            articles,
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        })
    }

    /// The latest `per_group` articles of every category and language.
    pub async fn trending(&self, per_group: i64) -> Result<Vec<Article>, StoreError> {
        Ok(sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY category_slug, lang ORDER BY published_at DESC, id DESC
                ) AS row_num
                FROM articles
             )
             WHERE row_num <= ?
             ORDER BY category_slug, lang, published_at DESC"
        ))
        .bind(per_group)
        .fetch_all(&self.pool)
        .await?)
    }
}
