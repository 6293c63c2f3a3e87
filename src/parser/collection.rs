use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Serialize;

use crate::fields::number_from_full_id;
use crate::stats::FieldStats;

use super::html::{absolute_url, block_text, first, first_text, origin_of};

static ID_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[id^=\"document_collection_\"]").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static SUMMARY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.summary").unwrap());
static ORG_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*=\"/government/organisations/\"]").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionPage {
    pub name: String,
    pub url: String,
    pub govuk_id: Option<i64>,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// The single responsible organization; the first one linked.
    pub organization_url: Option<String>,
}

pub fn parse_collection_page(
    html: &str,
    url: &str,
    name: &str,
    stats: &mut FieldStats,
) -> CollectionPage {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let govuk_id = first(root, &ID_SEL)
        .and_then(|el| el.value().id())
        .and_then(number_from_full_id);
    if govuk_id.is_none() {
        stats.add("Collection govuk ID not found", name);
    }

    let title = first_text(root, &TITLE_SEL);
    if title.is_none() {
        stats.add("Collection title not found", name);
    }

    let summary = first(root, &SUMMARY_SEL).and_then(block_text);
    if summary.is_none() {
        stats.add("Collection summary not found", name);
    }

    let organization_url = first(root, &ORG_LINK_SEL)
        .and_then(|link| link.value().attr("href"))
        .map(|href| absolute_url(origin_of(url), href));
    if organization_url.is_none() {
        stats.add("Collection organization not found", name);
    }

    CollectionPage {
        name: name.to_string(),
        url: url.to_string(),
        govuk_id,
        title,
        summary,
        organization_url,
    }
}
