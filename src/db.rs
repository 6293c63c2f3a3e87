use std::path::Path;

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{
    Attachment, Collection, CollectionDraft, Organization, Publication, PublicationDraft,
};
use crate::parser::OrganizationPage;
use crate::store::Store;

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> Result<Db, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Db { conn })
    }

    pub fn open_in_memory() -> Result<Db, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Db { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS organizations (
                id          INTEGER PRIMARY KEY,
                name        TEXT UNIQUE NOT NULL,
                govuk_id    INTEGER,
                url         TEXT NOT NULL,
                title       TEXT,
                description TEXT,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS collections (
                id              INTEGER PRIMARY KEY,
                name            TEXT UNIQUE NOT NULL,
                govuk_id        INTEGER,
                url             TEXT NOT NULL,
                title           TEXT,
                summary         TEXT,
                organization_id INTEGER REFERENCES organizations(id),
                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_collections_org ON collections(organization_id);

            CREATE TABLE IF NOT EXISTS publications (
                id               INTEGER PRIMARY KEY,
                name             TEXT UNIQUE NOT NULL,
                govuk_id         INTEGER,
                url              TEXT NOT NULL,
                title            TEXT,
                publication_type TEXT,
                summary          TEXT,
                detail           TEXT,
                published        TEXT,
                last_updated     TEXT,
                created_at       TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at       TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS attachments (
                id             INTEGER PRIMARY KEY,
                publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
                position       INTEGER NOT NULL,
                govuk_id       INTEGER,
                filename       TEXT NOT NULL,
                title          TEXT NOT NULL,
                format         TEXT,
                url            TEXT NOT NULL,
                UNIQUE(publication_id, position)
            );

            -- position keeps the order of the page's From: list
            CREATE TABLE IF NOT EXISTS publication_organizations (
                publication_id  INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
                organization_id INTEGER NOT NULL REFERENCES organizations(id),
                position        INTEGER NOT NULL,
                PRIMARY KEY (publication_id, organization_id)
            );
            CREATE INDEX IF NOT EXISTS idx_po_org ON publication_organizations(organization_id);

            CREATE TABLE IF NOT EXISTS publication_collections (
                publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
                collection_id  INTEGER NOT NULL REFERENCES collections(id),
                PRIMARY KEY (publication_id, collection_id)
            );
            CREATE INDEX IF NOT EXISTS idx_pc_collection ON publication_collections(collection_id);
            ",
        )?;
        Ok(())
    }

    pub fn counts(&self) -> Result<Counts, StoreError> {
        let count = |table: &str| -> Result<usize, StoreError> {
            let n = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
            Ok(n)
        };
        Ok(Counts {
            organizations: count("organizations")?,
            collections: count("collections")?,
            publications: count("publications")?,
            attachments: count("attachments")?,
        })
    }

    /// Names of the organizations linked to a publication, in "From:" order.
    pub fn publication_organization_names(&self, publication_id: i64) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.name FROM publication_organizations po
             JOIN organizations o ON o.id = po.organization_id
             WHERE po.publication_id = ?1
             ORDER BY po.position",
        )?;
        let rows = stmt
            .query_map([publication_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn publication_collection_names(&self, publication_id: i64) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.name FROM publication_collections pc
             JOIN collections c ON c.id = pc.collection_id
             WHERE pc.publication_id = ?1
             ORDER BY c.name",
        )?;
        let rows = stmt
            .query_map([publication_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub organizations: usize,
    pub collections: usize,
    pub publications: usize,
    pub attachments: usize,
}

/// `UPDATE <table> SET <col> = ?, ... WHERE id = ?` over just the given columns.
fn update_columns(
    conn: &Connection,
    table: &str,
    id: i64,
    columns: &[(&str, &dyn ToSql)],
) -> Result<(), StoreError> {
    if columns.is_empty() {
        return Ok(());
    }
    let sets: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, (col, _))| format!("{} = ?{}", col, i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {}, updated_at = datetime('now') WHERE id = ?{}",
        table,
        sets.join(", "),
        columns.len() + 1
    );
    let mut values: Vec<&dyn ToSql> = columns.iter().map(|(_, v)| *v).collect();
    values.push(&id);
    conn.execute(&sql, values.as_slice())?;
    Ok(())
}

// ── Organizations ──

impl Store<Organization> for Db {
    fn find_by_name(&self, name: &str) -> Result<Option<Organization>, StoreError> {
        let org = self
            .conn
            .query_row(
                "SELECT id, name, govuk_id, url, title, description
                 FROM organizations WHERE name = ?1",
                [name],
                |row| {
                    Ok(Organization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        govuk_id: row.get(2)?,
                        url: row.get(3)?,
                        title: row.get(4)?,
                        description: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(org)
    }

    fn create(&self, d: &OrganizationPage) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO organizations (name, govuk_id, url, title, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![d.name, d.govuk_id, d.url, d.title, d.description],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(
        &self,
        org: &Organization,
        d: &OrganizationPage,
        changed: &[&'static str],
    ) -> Result<(), StoreError> {
        let mut columns: Vec<(&str, &dyn ToSql)> = Vec::new();
        for field in changed {
            match *field {
                "govuk_id" => columns.push(("govuk_id", &d.govuk_id)),
                "url" => columns.push(("url", &d.url)),
                "title" => columns.push(("title", &d.title)),
                "description" => columns.push(("description", &d.description)),
                _ => {}
            }
        }
        update_columns(&self.conn, "organizations", org.id, &columns)
    }
}

// ── Collections ──

impl Store<Collection> for Db {
    fn find_by_name(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let collection = self
            .conn
            .query_row(
                "SELECT id, name, govuk_id, url, title, summary, organization_id
                 FROM collections WHERE name = ?1",
                [name],
                |row| {
                    Ok(Collection {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        govuk_id: row.get(2)?,
                        url: row.get(3)?,
                        title: row.get(4)?,
                        summary: row.get(5)?,
                        organization_id: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(collection)
    }

    fn create(&self, d: &CollectionDraft) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO collections (name, govuk_id, url, title, summary, organization_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![d.name, d.govuk_id, d.url, d.title, d.summary, d.organization_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(
        &self,
        collection: &Collection,
        d: &CollectionDraft,
        changed: &[&'static str],
    ) -> Result<(), StoreError> {
        let mut columns: Vec<(&str, &dyn ToSql)> = Vec::new();
        for field in changed {
            match *field {
                "govuk_id" => columns.push(("govuk_id", &d.govuk_id)),
                "url" => columns.push(("url", &d.url)),
                "title" => columns.push(("title", &d.title)),
                "summary" => columns.push(("summary", &d.summary)),
                "organization" => columns.push(("organization_id", &d.organization_id)),
                _ => {}
            }
        }
        update_columns(&self.conn, "collections", collection.id, &columns)
    }
}

// ── Publications ──

fn load_attachments(conn: &Connection, publication_id: i64) -> Result<Vec<Attachment>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT govuk_id, filename, title, format, url FROM attachments
         WHERE publication_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map([publication_id], |row| {
            Ok(Attachment {
                govuk_id: row.get(0)?,
                filename: row.get(1)?,
                title: row.get(2)?,
                format: row.get(3)?,
                url: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_ids(conn: &Connection, sql: &str, publication_id: i64) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([publication_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn replace_attachments(
    conn: &Connection,
    publication_id: i64,
    attachments: &[Attachment],
) -> Result<(), StoreError> {
    conn.execute("DELETE FROM attachments WHERE publication_id = ?1", [publication_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO attachments (publication_id, position, govuk_id, filename, title, format, url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (position, a) in attachments.iter().enumerate() {
        stmt.execute(params![
            publication_id,
            position as i64,
            a.govuk_id,
            a.filename,
            a.title,
            a.format,
            a.url,
        ])?;
    }
    Ok(())
}

fn replace_organization_links(
    conn: &Connection,
    publication_id: i64,
    organization_ids: &[i64],
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM publication_organizations WHERE publication_id = ?1",
        [publication_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO publication_organizations (publication_id, organization_id, position)
         VALUES (?1, ?2, ?3)",
    )?;
    for (position, org_id) in organization_ids.iter().enumerate() {
        stmt.execute(params![publication_id, org_id, position as i64])?;
    }
    Ok(())
}

fn replace_collection_links(
    conn: &Connection,
    publication_id: i64,
    collection_ids: &[i64],
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM publication_collections WHERE publication_id = ?1",
        [publication_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO publication_collections (publication_id, collection_id) VALUES (?1, ?2)",
    )?;
    for collection_id in collection_ids {
        stmt.execute(params![publication_id, collection_id])?;
    }
    Ok(())
}

impl Store<Publication> for Db {
    fn find_by_name(&self, name: &str) -> Result<Option<Publication>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, govuk_id, url, title, publication_type, summary, detail,
                        published, last_updated
                 FROM publications WHERE name = ?1",
                [name],
                |row| {
                    Ok(Publication {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        govuk_id: row.get(2)?,
                        url: row.get(3)?,
                        title: row.get(4)?,
                        kind: row.get(5)?,
                        summary: row.get(6)?,
                        detail: row.get(7)?,
                        published: row.get(8)?,
                        last_updated: row.get(9)?,
                        attachments: Vec::new(),
                        organization_ids: Vec::new(),
                        collection_ids: Vec::new(),
                    })
                },
            )
            .optional()?;
        let Some(mut publication) = row else {
            return Ok(None);
        };
        publication.attachments = load_attachments(&self.conn, publication.id)?;
        publication.organization_ids = load_ids(
            &self.conn,
            "SELECT organization_id FROM publication_organizations
             WHERE publication_id = ?1 ORDER BY position",
            publication.id,
        )?;
        publication.collection_ids = load_ids(
            &self.conn,
            "SELECT collection_id FROM publication_collections
             WHERE publication_id = ?1 ORDER BY collection_id",
            publication.id,
        )?;
        Ok(Some(publication))
    }

    fn create(&self, d: &PublicationDraft) -> Result<i64, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO publications
             (name, govuk_id, url, title, publication_type, summary, detail, published, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                d.name,
                d.govuk_id,
                d.url,
                d.title,
                d.kind,
                d.summary,
                d.detail,
                d.published,
                d.last_updated,
            ],
        )?;
        let id = tx.last_insert_rowid();
        replace_attachments(&tx, id, &d.attachments)?;
        replace_organization_links(&tx, id, d.organization_ids())?;
        replace_collection_links(&tx, id, d.collection_ids())?;
        tx.commit()?;
        Ok(id)
    }

    fn update(
        &self,
        publication: &Publication,
        d: &PublicationDraft,
        changed: &[&'static str],
    ) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut columns: Vec<(&str, &dyn ToSql)> = Vec::new();
        for field in changed {
            match *field {
                "govuk_id" => columns.push(("govuk_id", &d.govuk_id)),
                "url" => columns.push(("url", &d.url)),
                "title" => columns.push(("title", &d.title)),
                "type" => columns.push(("publication_type", &d.kind)),
                "summary" => columns.push(("summary", &d.summary)),
                "detail" => columns.push(("detail", &d.detail)),
                "published" => columns.push(("published", &d.published)),
                "last_updated" => columns.push(("last_updated", &d.last_updated)),
                "attachments" => replace_attachments(&tx, publication.id, &d.attachments)?,
                "organizations" => {
                    replace_organization_links(&tx, publication.id, d.organization_ids())?
                }
                "collections" => replace_collection_links(&tx, publication.id, d.collection_ids())?,
                _ => {}
            }
        }
        update_columns(&tx, "publications", publication.id, &columns)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use crate::parser::PublicationPage;

    fn org_page(name: &str, title: &str) -> OrganizationPage {
        OrganizationPage {
            name: name.into(),
            url: format!("https://www.gov.uk/government/organisations/{}", name),
            govuk_id: Some(86),
            title: Some(title.into()),
            description: None,
        }
    }

    fn attachment(n: i64) -> Attachment {
        Attachment {
            govuk_id: Some(n),
            filename: format!("file{}.csv", n),
            title: format!("File {}", n),
            format: Some("CSV".into()),
            url: format!("/uploads/file{}.csv", n),
        }
    }

    #[test]
    fn organization_create_find_update() {
        let db = Db::open_in_memory().unwrap();
        let draft = org_page("skills-funding-agency", "Skills Funding Agency");
        let id = Store::<Organization>::create(&db, &draft).unwrap();

        let found: Organization = db.find_by_name("skills-funding-agency").unwrap().unwrap();
        assert_eq!(found, Organization::from_draft(id, draft));

        let renamed = org_page("skills-funding-agency", "The Skills Funding Agency");
        db.update(&found, &renamed, &["title"]).unwrap();
        let found: Organization = db.find_by_name("skills-funding-agency").unwrap().unwrap();
        assert_eq!(found.title.as_deref(), Some("The Skills Funding Agency"));
        assert_eq!(found.govuk_id, Some(86));

        let missing: Option<Organization> = db.find_by_name("nobody").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn update_writes_only_named_fields() {
        let db = Db::open_in_memory().unwrap();
        let id = Store::<Organization>::create(&db, &org_page("home-office", "Home Office")).unwrap();
        let stored = Organization::from_draft(id, org_page("home-office", "Home Office"));

        let mut draft = org_page("home-office", "Renamed");
        draft.description = Some("New description".into());
        db.update(&stored, &draft, &["description"]).unwrap();

        let found: Organization = db.find_by_name("home-office").unwrap().unwrap();
        assert_eq!(found.title.as_deref(), Some("Home Office"));
        assert_eq!(found.description.as_deref(), Some("New description"));
    }

    #[test]
    fn publication_round_trips_with_links_and_attachments() {
        let db = Db::open_in_memory().unwrap();
        let org_a = Store::<Organization>::create(&db, &org_page("infrastructure-uk", "IUK")).unwrap();
        let org_b = Store::<Organization>::create(&db, &org_page("hm-treasury", "HMT")).unwrap();
        let orgs = [
            Organization::from_draft(org_a, org_page("infrastructure-uk", "IUK")),
            Organization::from_draft(org_b, org_page("hm-treasury", "HMT")),
        ];

        let page = PublicationPage {
            name: "publications/plan".into(),
            url: "https://www.gov.uk/government/publications/plan".into(),
            title: Some("Plan".into()),
            attachments: vec![attachment(2), attachment(1)],
            ..Default::default()
        };
        let draft = PublicationDraft::new(page, &orgs, &[]);
        let id = Store::<Publication>::create(&db, &draft).unwrap();

        let found: Publication = db.find_by_name("publications/plan").unwrap().unwrap();
        assert_eq!(found, Publication::from_draft(id, draft));
        assert_eq!(
            db.publication_organization_names(id).unwrap(),
            ["infrastructure-uk", "hm-treasury"]
        );
        assert_eq!(db.counts().unwrap().attachments, 2);
    }

    #[test]
    fn attachment_list_is_replaced_whole() {
        let db = Db::open_in_memory().unwrap();
        let page = |attachments| PublicationPage {
            name: "publications/data".into(),
            url: "https://www.gov.uk/government/publications/data".into(),
            attachments,
            ..Default::default()
        };
        let first = PublicationDraft::new(page(vec![attachment(1), attachment(2)]), &[], &[]);
        let id = Store::<Publication>::create(&db, &first).unwrap();
        let stored = Publication::from_draft(id, first);

        let second = PublicationDraft::new(page(vec![attachment(3)]), &[], &[]);
        let changed = stored.changed_fields(&second);
        assert_eq!(changed, ["attachments"]);
        db.update(&stored, &second, &changed).unwrap();

        let found: Publication = db.find_by_name("publications/data").unwrap().unwrap();
        assert_eq!(found.attachments, [attachment(3)]);
        assert_eq!(db.counts().unwrap().attachments, 1);
    }

    #[test]
    fn collection_references_its_organization() {
        let db = Db::open_in_memory().unwrap();
        let org_id = Store::<Organization>::create(&db, &org_page("defra", "Defra")).unwrap();
        let draft = CollectionDraft {
            name: "commodity-prices".into(),
            govuk_id: Some(12),
            url: "https://www.gov.uk/government/collections/commodity-prices".into(),
            title: Some("Commodity prices".into()),
            summary: None,
            organization_id: Some(org_id),
        };
        let id = Store::<Collection>::create(&db, &draft).unwrap();
        let found: Collection = db.find_by_name("commodity-prices").unwrap().unwrap();
        assert_eq!(found, Collection::from_draft(id, draft));
        assert_eq!(
            db.counts().unwrap(),
            Counts {
                organizations: 1,
                collections: 1,
                publications: 0,
                attachments: 0
            }
        );
    }
}
