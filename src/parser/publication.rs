use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::fields::{number_from_full_id, parse_date};
use crate::model::Attachment;
use crate::stats::FieldStats;

use super::html::{
    absolute_url, block_text, first, first_of, first_text, has_class, inside_class, non_empty,
    origin_of, text_of,
};

static ID_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("article[id]").unwrap());
static HEADING_TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".headings h1").unwrap());
static H1_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static TYPE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".title-context .type, p.type").unwrap());
static SUMMARY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.summary").unwrap());
static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".body .govspeak").unwrap());
static GOVSPEAK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".govspeak").unwrap());
static PUBLISHED_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("abbr.published[title], time.published[datetime]").unwrap());
static UPDATED_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("abbr.updated[title], time.updated[datetime]").unwrap());
static METADATA_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("dl.primary-metadata").unwrap());
static ORG_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*=\"/government/organisations/\"]").unwrap());
static COLLECTION_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*=\"/government/collections/\"]").unwrap());
static ATTACHMENT_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "section.attachment, .attachment-inline, a[href*=\"/attachment_data/file/\"]",
    )
    .unwrap()
});
static ATTACHMENT_TITLE_LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".title a[href]").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static ATTACHMENT_TYPE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".type").unwrap());

/// Format labels for attachments whose markup states none.
const EXTENSION_FORMATS: &[(&str, &str)] = &[
    ("csv", "CSV"),
    ("pdf", "PDF"),
    ("xls", "MS Excel Spreadsheet"),
    ("xlsx", "MS Excel Spreadsheet"),
    ("ods", "ODS"),
    ("odt", "ODT"),
    ("doc", "MS Word Document"),
    ("docx", "MS Word Document"),
    ("ppt", "MS Powerpoint Presentation"),
    ("pptx", "MS Powerpoint Presentation"),
    ("rtf", "RTF"),
    ("txt", "Plain text"),
    ("xml", "XML"),
    ("json", "JSON"),
    ("zip", "ZIP"),
    ("html", "HTML"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublicationPage {
    pub name: String,
    pub url: String,
    pub govuk_id: Option<i64>,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub summary: Option<String>,
    pub detail: Option<String>,
    pub published: Option<NaiveDateTime>,
    pub last_updated: Option<NaiveDateTime>,
    pub attachments: Vec<Attachment>,
    pub collection_urls: BTreeSet<String>,
    /// Responsible organizations in document order.
    pub organization_urls: Vec<String>,
}

pub fn parse_publication_page(
    html: &str,
    url: &str,
    name: &str,
    stats: &mut FieldStats,
) -> PublicationPage {
    let doc = Html::parse_document(html);
    let root = doc.root_element();
    let origin = origin_of(url);
    let mut missing = |category: &str| stats.add(category, name);

    let govuk_id = first(root, &ID_SEL)
        .and_then(|el| el.value().id())
        .and_then(number_from_full_id);
    if govuk_id.is_none() {
        missing("Govuk ID not found");
    }

    let title = first_of(root, &[&HEADING_TITLE_SEL, &H1_SEL])
        .map(text_of)
        .and_then(non_empty);
    if title.is_none() {
        missing("Title not found");
    }

    let kind = first_text(root, &TYPE_SEL);
    if kind.is_none() {
        missing("Type not found");
    }

    let summary = first(root, &SUMMARY_SEL).and_then(block_text);
    if summary.is_none() {
        missing("Summary not found");
    }

    let body = first_of(root, &[&BODY_SEL, &GOVSPEAK_SEL]);
    let detail = body.and_then(block_text);
    if detail.is_none() {
        missing("Detail not found");
    }

    let published = first(root, &PUBLISHED_SEL).and_then(timestamp);
    if published.is_none() {
        missing("Published not found");
    }

    // Many pages legitimately carry no "Last updated" line.
    let last_updated = first(root, &UPDATED_SEL).and_then(timestamp);
    if last_updated.is_none() {
        missing("Updated not found - check");
    }

    let metadata = first(root, &METADATA_SEL);
    let organization_urls = metadata_links(metadata, "From", &ORG_LINK_SEL, origin);
    if organization_urls.is_empty() {
        missing("Organization not found");
    }

    let collection_urls = metadata_links(metadata, "Part of", &COLLECTION_LINK_SEL, origin)
        .into_iter()
        .collect();

    let attachments = root
        .select(&ATTACHMENT_SEL)
        .filter_map(|el| attachment(el, stats, name))
        .collect();

    PublicationPage {
        name: name.to_string(),
        url: url.to_string(),
        govuk_id,
        title,
        kind,
        summary,
        detail,
        published,
        last_updated,
        attachments,
        collection_urls,
        organization_urls,
    }
}

/// Links matching `sel` in the `<dd>` entries under the metadata `<dt>`
/// labelled `label` ("From:", "Part of:"), deduplicated, in document order.
/// Links elsewhere on the page are never references.
fn metadata_links(
    metadata: Option<ElementRef>,
    label: &str,
    sel: &Selector,
    origin: &str,
) -> Vec<String> {
    let Some(metadata) = metadata else {
        return Vec::new();
    };
    let mut urls: Vec<String> = Vec::new();
    let mut in_section = false;
    for child in metadata.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "dt" => in_section = text_of(child).trim_end_matches(':').trim() == label,
            "dd" if in_section => {
                for link in child.select(sel) {
                    let Some(href) = link.value().attr("href") else {
                        continue;
                    };
                    let url = absolute_url(origin, href);
                    if !urls.contains(&url) {
                        urls.push(url);
                    }
                }
            }
            _ => {}
        }
    }
    urls
}

fn timestamp(el: ElementRef) -> Option<NaiveDateTime> {
    let raw = el
        .value()
        .attr("title")
        .or_else(|| el.value().attr("datetime"))?;
    parse_date(raw)
}

/// One attachment from either attachment markup (embedded section or inline
/// span) or a bare link to an uploaded file. Links nested inside attachment
/// markup are part of that attachment and yield nothing on their own.
fn attachment(el: ElementRef, stats: &mut FieldStats, name: &str) -> Option<Attachment> {
    let marked = has_class(el, "attachment") || has_class(el, "attachment-inline");
    if !marked {
        if inside_class(el, "attachment") || inside_class(el, "attachment-inline") {
            return None;
        }
        let url = el.value().attr("href")?.to_string();
        return Some(Attachment {
            govuk_id: None,
            filename: filename_of(&url),
            title: text_of(el),
            format: None,
            url,
        });
    }

    let Some(link) = first_of(el, &[&ATTACHMENT_TITLE_LINK_SEL, &LINK_SEL]) else {
        stats.add("Attachment link not found", name);
        return None;
    };
    let url = link.value().attr("href")?.to_string();
    let filename = filename_of(&url);
    let format = first_text(el, &ATTACHMENT_TYPE_SEL).or_else(|| {
        let inferred = format_from_extension(&filename);
        if inferred.is_some() {
            stats.add("Attachment format inferred", &filename);
        }
        inferred
    });

    Some(Attachment {
        govuk_id: el.value().id().and_then(number_from_full_id),
        filename,
        title: text_of(link),
        format,
        url,
    })
}

fn filename_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn format_from_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    EXTENSION_FORMATS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, label)| label.to_string())
        .and_then(non_empty)
}
