use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::fields::{name_from_url, number_from_full_id};
use crate::stats::FieldStats;

use super::html::{absolute_url, first, first_of, non_empty, text_of};

static COUNT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".filter-results-summary .count, .result-count .count").unwrap());
static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ol.document-list > li").unwrap());
static ROW_TITLE_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3 a[href]").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// The listing elements of one index page, still borrowing the document.
pub struct IndexListing<'a> {
    /// Total result count as printed, e.g. `"56,250"`.
    pub num_results: Option<String>,
    pub elements: Vec<ElementRef<'a>>,
}

/// Just enough about a listed publication to queue it for scraping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationBasics {
    pub govuk_id: Option<i64>,
    pub name: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexPage {
    pub num_results: Option<String>,
    /// Every listed item, including those without a usable link.
    pub listed: usize,
    pub publications: Vec<PublicationBasics>,
}

pub fn scrape_index<'a>(doc: &'a Html, stats: &mut FieldStats) -> IndexListing<'a> {
    let root = doc.root_element();
    let num_results = first(root, &COUNT_SEL).map(text_of).and_then(non_empty);
    if num_results.is_none() {
        stats.add("Result count not found", "index");
    }
    IndexListing {
        num_results,
        elements: root.select(&ROW_SEL).collect(),
    }
}

/// Id, name, title and URL of one listed publication. Does not fetch anything.
pub fn publication_basics(el: ElementRef, origin: &str) -> Option<PublicationBasics> {
    let link = first_of(el, &[&ROW_TITLE_LINK_SEL, &LINK_SEL])?;
    let url = absolute_url(origin, link.value().attr("href")?);
    let name = name_from_url(&url)?;
    let govuk_id = el.value().id().and_then(number_from_full_id);
    Some(PublicationBasics {
        govuk_id,
        name,
        title: text_of(link),
        url,
    })
}

/// Owned form of [`scrape_index`]: listed items reduced to their basics.
/// Items whose link is not a recognisable resource URL are skipped.
pub fn parse_index_page(html: &str, origin: &str, stats: &mut FieldStats) -> IndexPage {
    let doc = Html::parse_document(html);
    let listing = scrape_index(&doc, stats);
    let mut publications = Vec::with_capacity(listing.elements.len());
    for (i, el) in listing.elements.iter().enumerate() {
        match publication_basics(*el, origin) {
            Some(basics) => publications.push(basics),
            None => stats.add("Publication link not found", &format!("index item {}", i)),
        }
    }
    IndexPage {
        num_results: listing.num_results,
        listed: listing.elements.len(),
        publications,
    }
}
