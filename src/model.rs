//! Entities as persisted, the drafts they are reconciled from, and the change
//! classification produced by reconciliation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::parser::OrganizationPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Publication,
    Collection,
    Organization,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Publication => "publication",
            Self::Collection => "collection",
            Self::Organization => "organization",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A downloadable file belonging to one publication. `govuk_id` and `format`
/// are absent for attachments the page links to without attachment markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub govuk_id: Option<i64>,
    pub filename: String,
    pub title: String,
    pub format: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub govuk_id: Option<i64>,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub govuk_id: Option<i64>,
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub organization_id: Option<i64>,
}

/// Collection fields once its organization has been resolved to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDraft {
    pub name: String,
    pub govuk_id: Option<i64>,
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub organization_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub id: i64,
    pub name: String,
    pub govuk_id: Option<i64>,
    pub url: String,
    pub title: Option<String>,
    pub kind: Option<String>,
    pub summary: Option<String>,
    pub detail: Option<String>,
    pub published: Option<NaiveDateTime>,
    pub last_updated: Option<NaiveDateTime>,
    pub attachments: Vec<Attachment>,
    /// Document order of the page's "From:" block.
    pub organization_ids: Vec<i64>,
    /// Sorted, no duplicates.
    pub collection_ids: Vec<i64>,
}

/// Publication fields with every reference already resolved. Only
/// [`PublicationDraft::new`] builds one, and it takes the resolved entities,
/// so a draft cannot point at an organization or collection that is not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationDraft {
    pub name: String,
    pub govuk_id: Option<i64>,
    pub url: String,
    pub title: Option<String>,
    pub kind: Option<String>,
    pub summary: Option<String>,
    pub detail: Option<String>,
    pub published: Option<NaiveDateTime>,
    pub last_updated: Option<NaiveDateTime>,
    pub attachments: Vec<Attachment>,
    organization_ids: Vec<i64>,
    collection_ids: Vec<i64>,
}

impl PublicationDraft {
    pub fn new(
        page: crate::parser::PublicationPage,
        organizations: &[Organization],
        collections: &[Collection],
    ) -> Self {
        let mut organization_ids = Vec::with_capacity(organizations.len());
        for org in organizations {
            if !organization_ids.contains(&org.id) {
                organization_ids.push(org.id);
            }
        }
        let mut collection_ids: Vec<i64> = collections.iter().map(|c| c.id).collect();
        collection_ids.sort_unstable();
        collection_ids.dedup();

        PublicationDraft {
            name: page.name,
            govuk_id: page.govuk_id,
            url: page.url,
            title: page.title,
            kind: page.kind,
            summary: page.summary,
            detail: page.detail,
            published: page.published,
            last_updated: page.last_updated,
            attachments: page.attachments,
            organization_ids,
            collection_ids,
        }
    }

    pub fn organization_ids(&self) -> &[i64] {
        &self.organization_ids
    }

    pub fn collection_ids(&self) -> &[i64] {
        &self.collection_ids
    }
}

/// Something the reconciliation engine can find by name, create from a draft
/// and compare field by field against a fresh draft.
pub trait Entity: Sized {
    const KIND: EntityKind;
    type Draft;

    fn id(&self) -> i64;
    fn name(&self) -> &str;
    fn draft_name(draft: &Self::Draft) -> &str;
    /// Names of the fields whose draft value differs from the stored one.
    fn changed_fields(&self, draft: &Self::Draft) -> Vec<&'static str>;
    fn from_draft(id: i64, draft: Self::Draft) -> Self;

    fn attachment_count(&self) -> Option<usize> {
        None
    }
}

fn push_if<T: PartialEq>(changed: &mut Vec<&'static str>, field: &'static str, a: &T, b: &T) {
    if a != b {
        changed.push(field);
    }
}

impl Entity for Organization {
    const KIND: EntityKind = EntityKind::Organization;
    type Draft = OrganizationPage;

    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn draft_name(draft: &OrganizationPage) -> &str {
        &draft.name
    }

    fn changed_fields(&self, d: &OrganizationPage) -> Vec<&'static str> {
        let mut changed = Vec::new();
        push_if(&mut changed, "govuk_id", &self.govuk_id, &d.govuk_id);
        push_if(&mut changed, "url", &self.url, &d.url);
        push_if(&mut changed, "title", &self.title, &d.title);
        push_if(&mut changed, "description", &self.description, &d.description);
        changed
    }

    fn from_draft(id: i64, d: OrganizationPage) -> Self {
        Organization {
            id,
            name: d.name,
            govuk_id: d.govuk_id,
            url: d.url,
            title: d.title,
            description: d.description,
        }
    }
}

impl Entity for Collection {
    const KIND: EntityKind = EntityKind::Collection;
    type Draft = CollectionDraft;

    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn draft_name(draft: &CollectionDraft) -> &str {
        &draft.name
    }

    fn changed_fields(&self, d: &CollectionDraft) -> Vec<&'static str> {
        let mut changed = Vec::new();
        push_if(&mut changed, "govuk_id", &self.govuk_id, &d.govuk_id);
        push_if(&mut changed, "url", &self.url, &d.url);
        push_if(&mut changed, "title", &self.title, &d.title);
        push_if(&mut changed, "summary", &self.summary, &d.summary);
        push_if(&mut changed, "organization", &self.organization_id, &d.organization_id);
        changed
    }

    fn from_draft(id: i64, d: CollectionDraft) -> Self {
        Collection {
            id,
            name: d.name,
            govuk_id: d.govuk_id,
            url: d.url,
            title: d.title,
            summary: d.summary,
            organization_id: d.organization_id,
        }
    }
}

impl Entity for Publication {
    const KIND: EntityKind = EntityKind::Publication;
    type Draft = PublicationDraft;

    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn draft_name(draft: &PublicationDraft) -> &str {
        &draft.name
    }

    fn changed_fields(&self, d: &PublicationDraft) -> Vec<&'static str> {
        let mut changed = Vec::new();
        push_if(&mut changed, "govuk_id", &self.govuk_id, &d.govuk_id);
        push_if(&mut changed, "url", &self.url, &d.url);
        push_if(&mut changed, "title", &self.title, &d.title);
        push_if(&mut changed, "type", &self.kind, &d.kind);
        push_if(&mut changed, "summary", &self.summary, &d.summary);
        push_if(&mut changed, "detail", &self.detail, &d.detail);
        push_if(&mut changed, "published", &self.published, &d.published);
        push_if(&mut changed, "last_updated", &self.last_updated, &d.last_updated);
        // The attachment list is one atomic field: any difference replaces it.
        push_if(&mut changed, "attachments", &self.attachments, &d.attachments);
        push_if(&mut changed, "organizations", &self.organization_ids, &d.organization_ids);
        push_if(&mut changed, "collections", &self.collection_ids, &d.collection_ids);
        changed
    }

    fn from_draft(id: i64, d: PublicationDraft) -> Self {
        Publication {
            id,
            name: d.name,
            govuk_id: d.govuk_id,
            url: d.url,
            title: d.title,
            kind: d.kind,
            summary: d.summary,
            detail: d.detail,
            published: d.published,
            last_updated: d.last_updated,
            attachments: d.attachments,
            organization_ids: d.organization_ids,
            collection_ids: d.collection_ids,
        }
    }

    fn attachment_count(&self) -> Option<usize> {
        Some(self.attachments.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated(Vec<&'static str>),
    Unchanged,
}

impl Change {
    pub fn label(&self) -> &'static str {
        match self {
            Change::Created => "Created",
            Change::Updated(_) => "Updated",
            Change::Unchanged => "Unchanged",
        }
    }
}

/// Human-readable description of what one reconciliation did, keyed by the
/// entity kind (and `attachments` for publications). Empty when unchanged.
pub type ChangeSummary = BTreeMap<&'static str, String>;

#[derive(Debug, Clone)]
pub struct Reconciled<E> {
    pub entity: E,
    pub change: Change,
}

impl<E: Entity> Reconciled<E> {
    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::new();
        let attachments = self.entity.attachment_count();
        match &self.change {
            Change::Unchanged => {}
            Change::Created => {
                summary.insert(E::KIND.label(), "Created".to_string());
                if let Some(n) = attachments.filter(|n| *n > 0) {
                    summary.insert("attachments", format!("Add first {} attachments", n));
                }
            }
            Change::Updated(fields) => {
                summary.insert(E::KIND.label(), format!("Updated: {}", fields.join(", ")));
                if let Some(n) = attachments.filter(|_| fields.contains(&"attachments")) {
                    summary.insert("attachments", format!("Replaced with {} attachments", n));
                }
            }
        }
        summary
    }
}
