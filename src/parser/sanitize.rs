//! HTML description to plain-text excerpt.

use crate::utils::truncate_with_ellipsis;
use scraper::node::Node;
use scraper::{ElementRef, Html};

/// Maximum length of a stored excerpt, in characters.
pub const MAX_EXCERPT_CHARS: usize = 500;

/// Elements removed with their whole subtree before text extraction.
const DROPPED_ELEMENTS: &[&str] = &["img", "script", "style", "iframe"];

/// Elements whose boundaries separate words. Inline elements (`b`, `a`,
/// `span`, ...) are concatenated with their neighbours as-is.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th",
    "tr", "ul",
];

/// Reduce description markup to plain text.
///
/// Images, scripts, styles and inline frames are dropped entirely. Block
/// element boundaries become a single space, inline markup is transparent,
/// and whitespace runs are collapsed.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(html_to_text("<p>Read <a href='/x'>more</a>.</p><p>Next</p>"), "Read more. Next");
/// ```
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut raw = String::new();
    collect_text(fragment.root_element(), &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if DROPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(el) => {
                let block = BLOCK_ELEMENTS.contains(&el.name());
                if block {
                    out.push(' ');
                }
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, out);
                }
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Sanitize a description into a stored excerpt of at most
/// [`MAX_EXCERPT_CHARS`] characters.
pub fn excerpt(html: &str) -> String {
    truncate_with_ellipsis(&html_to_text(html), MAX_EXCERPT_CHARS)
}
