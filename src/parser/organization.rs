use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Serialize;

use crate::fields::number_from_full_id;
use crate::stats::FieldStats;

use super::html::{block_text, first, first_of, first_text};

static ID_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[id^=\"organisation_\"]").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".organisation-description").unwrap());
static FALLBACK_DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".description").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganizationPage {
    pub name: String,
    pub url: String,
    pub govuk_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
}

pub fn parse_organization_page(
    html: &str,
    url: &str,
    name: &str,
    stats: &mut FieldStats,
) -> OrganizationPage {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let govuk_id = first(root, &ID_SEL)
        .and_then(|el| el.value().id())
        .and_then(number_from_full_id);
    if govuk_id.is_none() {
        stats.add("Organization govuk ID not found", name);
    }

    let title = first_text(root, &TITLE_SEL);
    if title.is_none() {
        stats.add("Organization title not found", name);
    }

    let description =
        first_of(root, &[&DESCRIPTION_SEL, &FALLBACK_DESCRIPTION_SEL]).and_then(block_text);
    if description.is_none() {
        stats.add("Organization description not found", name);
    }

    OrganizationPage {
        name: name.to_string(),
        url: url.to_string(),
        govuk_id,
        title,
        description,
    }
}
