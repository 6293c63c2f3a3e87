//! Small pure helpers for turning scraped strings into field values.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;

/// `<scheme://host>/government/<type>/<slug>`, host optional.
static RESOURCE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://[^/]+)?/government/([a-z][a-z-]*)/([A-Za-z0-9][A-Za-z0-9_.-]*)/?(?:[?#].*)?$")
        .unwrap()
});

static FULL_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_-]*_(\d+)$").unwrap());

/// Resource types whose names drop the type segment.
const BARE_NAME_TYPES: &[&str] = &["organisations", "collections"];

/// Parse a timestamp carrying a UTC offset and normalise it to naive UTC.
///
/// `2014-02-25T13:50:00+01:00` becomes `2014-02-25 12:50:00`.
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%:z"))
        .ok()
        .map(|dt| dt.naive_utc())
}

/// Canonical entity name for a site URL.
///
/// Organisations and collections are named by their slug alone. Every other
/// resource type is a publication flavour and keeps its type segment, so
/// `publications/foo` never collides with a collection called `foo`.
pub fn name_from_url(url: &str) -> Option<String> {
    let caps = RESOURCE_URL_RE.captures(url.trim())?;
    let kind = &caps[1];
    let slug = &caps[2];
    if BARE_NAME_TYPES.contains(&kind) {
        Some(slug.to_string())
    } else {
        Some(format!("{}/{}", kind, slug))
    }
}

/// The resource-type segment of a site URL, e.g. `publications`.
pub fn url_object_type(url: &str) -> Option<&str> {
    RESOURCE_URL_RE
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// `publication_370126` -> `370126`
pub fn number_from_full_id(full_id: &str) -> Option<i64> {
    FULL_ID_RE
        .captures(full_id.trim())
        .and_then(|caps| caps[1].parse().ok())
}

/// Replace curly quotes and en/em dashes with their ASCII counterparts.
pub fn sanitize_unicode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            other => other,
        })
        .collect()
}
