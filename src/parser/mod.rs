//! Feed payload parsing and entry normalization.
//!
//! Parsing is a pure transform from raw bytes to [`ParsedFeed`]:
//!
//! | Format | Root | Entry element |
//! |--------|------|---------------|
//! | RSS 2.0 | `<rss>` | `<item>` |
//! | RSS 1.0 (RDF) | `<rdf:RDF>` | `<item>` |
//! | Atom | `<feed>` | `<entry>` |
//!
//! A malformed payload is not an error by itself: entries read before the
//! fault are kept and the feed is flagged "bozo". Only a payload yielding no
//! entries *and* a fault is a [`ParseFailure`].
//!
//! # Submodules
//!
//! - [`sanitize`]: HTML description to plain-text excerpt
//! - [`normalize`]: [`RawEntry`] to [`Article`](crate::models::Article)

pub mod normalize;
pub mod sanitize;

use crate::error::ParseFailure;
use crate::models::{ParsedFeed, RawEntry};
use quick_xml::encoding::Decoder;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Guid,
    Description,
    Content,
    Published,
    Updated,
}

impl Field {
    fn from_element(name: &str) -> Option<Self> {
        match name {
            "title" => Some(Field::Title),
            "link" => Some(Field::Link),
            "guid" | "id" => Some(Field::Guid),
            "description" | "summary" => Some(Field::Description),
            "content" | "content:encoded" => Some(Field::Content),
            "pubDate" | "published" | "issued" | "dc:date" => Some(Field::Published),
            "updated" | "modified" => Some(Field::Updated),
            _ => None,
        }
    }
}

/// Accumulates the fields of one `<item>`/`<entry>`.
#[derive(Default)]
struct EntryBuilder {
    title: Option<String>,
    link: Option<String>,
    /// Atom `<link href>` with `rel="alternate"` (or no rel).
    alternate: Option<String>,
    guid: Option<String>,
    guid_is_permalink: bool,
    description: Option<String>,
    content: Option<String>,
    published: Option<String>,
    updated: Option<String>,
}

impl EntryBuilder {
    fn set(&mut self, field: Field, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Guid => &mut self.guid,
            Field::Description => &mut self.description,
            Field::Content => &mut self.content,
            Field::Published => &mut self.published,
            Field::Updated => &mut self.updated,
        };
        // First occurrence wins, e.g. `pubDate` over a later `dc:date`.
        if slot.is_none() {
            *slot = Some(text);
        }
    }

    fn atom_link(&mut self, start: &BytesStart<'_>, decoder: Decoder) {
        let mut href = None;
        let mut rel = None;
        for attr in start.attributes().flatten() {
            match attr.key.as_ref() {
                b"href" => href = Some(attr_value(&attr.value, decoder)),
                b"rel" => rel = Some(attr_value(&attr.value, decoder)),
                _ => {}
            }
        }
        let Some(href) = href.filter(|h| !h.trim().is_empty()) else {
            return;
        };
        match rel.as_deref() {
            None | Some("alternate") => {
                if self.alternate.is_none() {
                    self.alternate = Some(href.trim().to_string());
                }
            }
            _ => {
                if self.link.is_none() {
                    self.link = Some(href.trim().to_string());
                }
            }
        }
    }

    fn build(self) -> RawEntry {
        let guid_link = self
            .guid
            .filter(|g| self.guid_is_permalink && g.starts_with("http"));
        RawEntry {
            title: self.title,
            link: self.alternate.or(self.link).or(guid_link),
            description: self.description.or(self.content),
            published: self.published,
            updated: self.updated,
        }
    }
}

/// The field element currently being read, and how much markup is open
/// inside it.
struct Capture {
    field: Field,
    element: String,
    depth: usize,
}

/// Decode bytes with the document encoding (XML declaration or BOM),
/// falling back to lossy UTF-8.
fn decode(bytes: &[u8], decoder: Decoder) -> String {
    match decoder.decode(bytes) {
        Ok(text) => text.into_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn attr_value(raw: &[u8], decoder: Decoder) -> String {
    let s = decode(raw, decoder);
    match unescape(&s) {
        Ok(unescaped) => unescaped.into_owned(),
        Err(_) => s,
    }
}

/// Resolve an entity reference such as `amp` or `#39`.
///
/// Entities unknown to XML (`nbsp`, `eacute`, ...) are kept verbatim so the
/// HTML sanitizer can decode them later.
fn resolve_entity(name: &str) -> String {
    let reference = format!("&{name};");
    match unescape(&reference) {
        Ok(resolved) => resolved.into_owned(),
        Err(_) => reference,
    }
}

fn is_feed_root(name: &str) -> bool {
    matches!(name, "rss" | "feed" | "rdf:RDF" | "RDF")
}

fn is_entry(name: &str) -> bool {
    name == "item" || name == "entry"
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// Keep the first fault found in a payload.
fn note(bozo: &mut Option<String>, detail: String) {
    if bozo.is_none() {
        *bozo = Some(detail);
    }
}

/// Parse a raw feed payload into its entries.
///
/// End tags are not required to match their start tags: descriptions often
/// carry unescaped HTML such as `<br>`. Such faults are noted in `bozo` and
/// reading goes on.
///
/// # Returns
///
/// - `Ok` with zero entries for an empty payload or a well-formed feed
///   without items
/// - `Ok` with `bozo` set when the XML was faulty but entries were recovered
/// - `Err` when nothing could be recovered from a malformed payload, or the
///   document is not a feed (e.g. an HTML error page)
#[instrument(level = "debug", skip_all, fields(bytes = raw.len()))]
pub fn parse(raw: &[u8]) -> Result<ParsedFeed, ParseFailure> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(ParsedFeed::default());
    }

    let mut reader = Reader::from_reader(raw);
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();

    let mut feed = ParsedFeed::default();
    let mut saw_root = false;
    let mut current: Option<EntryBuilder> = None;
    let mut capture: Option<Capture> = None;
    let mut text = String::new();

    loop {
        buf.clear();
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                note(
                    &mut feed.bozo,
                    format!("{e} at position {}", reader.buffer_position()),
                );
                break;
            }
        };
        let decoder = reader.decoder();

        match event {
            Event::Start(start) => {
                let name = element_name(&start);
                if !saw_root {
                    if !is_feed_root(&name) {
                        return Err(ParseFailure::Malformed {
                            detail: format!("document root <{name}> is not a feed"),
                        });
                    }
                    saw_root = true;
                    continue;
                }
                if let Some(open) = capture.as_mut() {
                    open.depth += 1;
                    text.push(' ');
                } else if is_entry(&name) {
                    if let Some(unclosed) = current.take() {
                        note(
                            &mut feed.bozo,
                            format!("<{name}> opened before the previous one closed"),
                        );
                        feed.entries.push(unclosed.build());
                    }
                    current = Some(EntryBuilder::default());
                } else if let Some(entry) = current.as_mut() {
                    if name == "link" {
                        entry.atom_link(&start, decoder);
                    }
                    if name == "guid" {
                        entry.guid_is_permalink = start
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"isPermaLink")
                            .map(|a| attr_value(&a.value, decoder) != "false")
                            .unwrap_or(true);
                    }
                    if let Some(field) = Field::from_element(&name) {
                        capture = Some(Capture {
                            field,
                            element: name,
                            depth: 0,
                        });
                        text.clear();
                    }
                }
            }
            Event::Empty(start) => {
                let name = element_name(&start);
                if !saw_root {
                    if !is_feed_root(&name) {
                        return Err(ParseFailure::Malformed {
                            detail: format!("document root <{name}> is not a feed"),
                        });
                    }
                    saw_root = true;
                    continue;
                }
                if capture.is_some() {
                    text.push(' ');
                } else if name == "link" {
                    if let Some(entry) = current.as_mut() {
                        entry.atom_link(&start, decoder);
                    }
                }
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                let Some(mut open) = capture.take() else {
                    if is_entry(&name) {
                        if let Some(entry) = current.take() {
                            feed.entries.push(entry.build());
                        }
                    }
                    continue;
                };

                if name == open.element {
                    if open.depth > 0 {
                        note(&mut feed.bozo, format!("unbalanced markup inside <{name}>"));
                    }
                    if let Some(entry) = current.as_mut() {
                        entry.set(open.field, std::mem::take(&mut text));
                    }
                } else if open.depth > 0 {
                    open.depth -= 1;
                    text.push(' ');
                    capture = Some(open);
                } else if is_entry(&name) {
                    note(
                        &mut feed.bozo,
                        format!("<{}> not closed before </{name}>", open.element),
                    );
                    if let Some(mut entry) = current.take() {
                        entry.set(open.field, std::mem::take(&mut text));
                        feed.entries.push(entry.build());
                    }
                } else {
                    note(
                        &mut feed.bozo,
                        format!("stray </{name}> inside <{}>", open.element),
                    );
                    capture = Some(open);
                }
            }
            Event::Text(t) => {
                if capture.is_some() {
                    let raw_text = decode(&t, decoder);
                    match unescape(&raw_text) {
                        Ok(s) => text.push_str(&s),
                        Err(_) => text.push_str(&raw_text),
                    }
                }
            }
            Event::CData(c) => {
                if capture.is_some() {
                    text.push_str(&decode(&c, decoder));
                }
            }
            Event::GeneralRef(r) => {
                if capture.is_some() {
                    text.push_str(&resolve_entity(&decode(&r, decoder)));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if current.is_some() {
        note(&mut feed.bozo, "document ended inside an entry".to_string());
    }
    if !saw_root {
        note(&mut feed.bozo, "no root element found".to_string());
    }

    debug!(entries = feed.entries.len(), bozo = feed.bozo.is_some(), "Parsed feed payload");

    match feed.bozo {
        Some(detail) if feed.entries.is_empty() => Err(ParseFailure::Malformed { detail }),
        _ => Ok(feed),
    }
}
