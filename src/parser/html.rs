use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use crate::fields::sanitize_unicode;

pub const DEFAULT_ORIGIN: &str = "https://www.gov.uk";

static BLOCK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6, p, li, td, th").unwrap());
static INLINE_ATTACHMENT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".attachment-inline").unwrap());

pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-collapsed, typography-sanitised text of an element.
pub fn text_of(el: ElementRef) -> String {
    sanitize_unicode(&normalize_ws(&el.text().collect::<String>()))
}

pub fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub fn first<'a>(scope: ElementRef<'a>, sel: &Selector) -> Option<ElementRef<'a>> {
    scope.select(sel).next()
}

/// First match of the first selector that matches anything, so earlier
/// selectors take priority regardless of document order.
pub fn first_of<'a>(scope: ElementRef<'a>, sels: &[&Selector]) -> Option<ElementRef<'a>> {
    sels.iter().find_map(|sel| first(scope, sel))
}

pub fn first_text(scope: ElementRef, sel: &Selector) -> Option<String> {
    first(scope, sel).map(text_of).and_then(non_empty)
}

pub fn has_class(el: ElementRef, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

/// True if any ancestor element carries `class`.
pub fn inside_class(el: ElementRef, class: &str) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| has_class(a, class))
}

/// Body text of a container, one line per innermost block element.
/// Attachment blocks are left out; they are captured as attachments.
pub fn block_text(container: ElementRef) -> Option<String> {
    let lines: Vec<String> = container
        .select(&BLOCK_SEL)
        .filter(|el| el.select(&BLOCK_SEL).next().is_none())
        .filter(|el| !inside_class(*el, "attachment") && !inside_class(*el, "attachment-inline"))
        .filter(|el| el.select(&INLINE_ATTACHMENT_SEL).next().is_none())
        .map(text_of)
        .filter(|t| !t.is_empty())
        .collect();
    non_empty(lines.join("\n"))
}

/// `scheme://host` of an absolute URL, or the public site origin otherwise.
pub fn origin_of(url: &str) -> &str {
    let Some(scheme_end) = url.find("://") else {
        return DEFAULT_ORIGIN;
    };
    let rest = &url[scheme_end + 3..];
    match rest.find('/') {
        Some(slash) => &url[..scheme_end + 3 + slash],
        None => url,
    }
}

pub fn absolute_url(origin: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", origin.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", origin.trim_end_matches('/'), href)
    }
}
