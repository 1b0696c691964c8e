//! Plain-text rendering for the terminal.

use crate::models::Article;
use crate::report::BatchReport;
use itertools::Itertools;
use std::fmt::Write;

/// Human summary of an ingestion pass.
///
/// ```text
/// New articles: 12 (en: 5, fr: 7)
/// Feeds: 9 ok, 2 failed (empty/error: 1, fetch: 1)
///   - https://example.com/rss [en/tech]: fetch failed: HTTP error 404
/// Pruned: 3
/// Stored: 418 (en: 200, fr: 218)
/// ```
pub fn batch_summary(report: &BatchReport) -> String {
    let mut out = String::new();

    let per_lang = report
        .new_by_lang
        .iter()
        .map(|(lang, n)| format!("{lang}: {n}"))
        .join(", ");
    let _ = writeln!(out, "New articles: {} ({per_lang})", report.total_new());

    let _ = write!(out, "Feeds: {} ok, {} failed", report.feeds_ok, report.feeds_failed);
    if report.feeds_failed > 0 {
        let by_cat = report
            .failures_by_category()
            .iter()
            .map(|(cat, n)| format!("{cat}: {n}"))
            .join(", ");
        let _ = write!(out, " ({by_cat})");
    }
    out.push('\n');
    for failure in &report.failures {
        let _ = writeln!(
            out,
            "  - {} [{}/{}]: {}",
            failure.url, failure.lang, failure.category_slug, failure.reason
        );
    }

    let _ = writeln!(out, "Pruned: {}", report.pruned);
    let stored = report
        .stats
        .by_language
        .iter()
        .map(|(lang, n)| format!("{lang}: {n}"))
        .join(", ");
    let _ = writeln!(out, "Stored: {} ({stored})", report.stats.total);
    out
}

/// One line per article: date, language, category and title, then the URL.
pub fn article_list(articles: &[Article]) -> String {
    articles
        .iter()
        .map(|a| {
            format!(
                "{} [{}] {}: {}\n    {}",
                a.published_at, a.lang, a.category, a.title, a.url
            )
        })
        .join("\n")
}

/// Articles grouped under a `category_slug/lang` heading.
pub fn trending_list(articles: &[Article]) -> String {
    let mut out = String::new();
    for ((slug, lang), group) in &articles
        .iter()
        .chunk_by(|a| (a.category_slug.clone(), a.lang.clone()))
    {
        let _ = writeln!(out, "## {slug}/{lang}");
        for article in group {
            let _ = writeln!(out, "- {} ({})", article.title, article.published_at);
        }
    }
    out
}
