//! HTML page parsers, one per page kind. Parsers never fail: fields whose
//! markup is missing come back as `None` and are counted in [`FieldStats`].

pub mod collection;
pub mod html;
pub mod index;
pub mod organization;
pub mod publication;

use serde::Serialize;

use crate::fields::url_object_type;
use crate::stats::FieldStats;

pub use collection::{parse_collection_page, CollectionPage};
pub use index::{parse_index_page, IndexPage, PublicationBasics};
pub use organization::{parse_organization_page, OrganizationPage};
pub use publication::{parse_publication_page, PublicationPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Index,
    Publication,
    Collection,
    Organization,
}

impl PageKind {
    /// Guess the page kind from a site URL. Anything under `/government/`
    /// that is not an organisation or collection is a publication flavour.
    pub fn from_url(url: &str) -> Option<PageKind> {
        match url_object_type(url) {
            Some("organisations") => Some(PageKind::Organization),
            Some("collections") => Some(PageKind::Collection),
            Some(_) => Some(PageKind::Publication),
            None => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.trim_end_matches('/')
                    .ends_with("/government/publications")
                    .then_some(PageKind::Index)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Page {
    Index(IndexPage),
    Publication(PublicationPage),
    Collection(CollectionPage),
    Organization(OrganizationPage),
}

/// Parse `html` as a page of the given kind. `name` is the entity name the
/// caller derived from `url`; index pages ignore it.
pub fn parse_page(kind: PageKind, html: &str, url: &str, name: &str, stats: &mut FieldStats) -> Page {
    match kind {
        PageKind::Index => Page::Index(parse_index_page(html, html::origin_of(url), stats)),
        PageKind::Publication => Page::Publication(parse_publication_page(html, url, name, stats)),
        PageKind::Collection => Page::Collection(parse_collection_page(html, url, name, stats)),
        PageKind::Organization => {
            Page::Organization(parse_organization_page(html, url, name, stats))
        }
    }
}
