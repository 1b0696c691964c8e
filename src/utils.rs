//! Helpers for string handling, body decompression and host extraction.
//!
//! - Character-safe truncation for logs and excerpts
//! - Category slug derivation for feed lists that only carry a display name
//! - Transparent gzip/deflate decoding of fetched bodies
//! - Host extraction used to group feeds into per-host lanes

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Read;
use tracing::warn;
use url::Url;

/// Truncate a string for logging.
///
/// Long strings are cut to `max` characters and a `…(+N bytes)` marker
/// counting the dropped bytes is appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Truncate `s` to at most `max` characters, ending with `...` when cut.
///
/// Counting is by Unicode scalar value, so multi-byte text is never split
/// inside a character.
pub fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    const MARKER: &str = "...";
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(MARKER.len());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(MARKER);
    out
}

/// Derive a stable machine key from a category display name.
///
/// Lowercases, folds common Latin accents, and joins alphanumeric runs with
/// hyphens.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Santé"), "sante");
/// assert_eq!(slugify("Actualités du Monde"), "actualites-du-monde");
/// ```
pub fn slugify(name: &str) -> String {
    let folded: String = name.to_lowercase().chars().map(fold_accent).collect();
    folded
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decode a response body according to its `Content-Encoding`.
///
/// Gzip is also detected by its magic bytes when the header is missing.
/// When decoding fails the raw payload is returned unchanged.
pub fn decode_body(content_encoding: Option<&str>, raw: Vec<u8>) -> Vec<u8> {
    let encoding = content_encoding
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let decoded = if encoding == "gzip" || encoding == "x-gzip" || raw.starts_with(&GZIP_MAGIC) {
        read_all(GzDecoder::new(raw.as_slice()))
    } else if encoding == "deflate" {
        // HTTP "deflate" is nominally zlib-wrapped; some servers send raw deflate.
        read_all(ZlibDecoder::new(raw.as_slice()))
            .or_else(|_| read_all(DeflateDecoder::new(raw.as_slice())))
    } else {
        return raw;
    };

    match decoded {
        Ok(body) => body,
        Err(e) => {
            warn!(encoding = %encoding, error = %e, "Failed to decompress body; using raw payload");
            raw
        }
    }
}

fn read_all(mut reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

/// Lowercased host of a URL, or the whole string when it does not parse.
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| url.to_string())
}
