use std::collections::HashSet;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::error::ScrapeError;
use crate::fetch::Fetch;
use crate::fields::name_from_url;
use crate::model::{
    Collection, CollectionDraft, EntityKind, Organization, Publication, PublicationDraft,
    Reconciled,
};
use crate::parser::html::origin_of;
use crate::parser::{
    parse_collection_page, parse_index_page, parse_organization_page, parse_publication_page,
};
use crate::reconcile::{find_existing, reconcile};
use crate::stats::RunStats;
use crate::store::Catalog;

/// Give up on the index after this many index pages in a row fail to fetch.
pub const MAX_CONSECUTIVE_INDEX_FAILURES: usize = 3;

/// Drives fetch, parse and reconcile for every entity kind, one entity at a
/// time. Owns the statistics of the current run.
pub struct Scraper<F, S> {
    fetcher: F,
    store: S,
    base_url: String,
    stats: RunStats,
}

impl<F: Fetch, S: Catalog> Scraper<F, S> {
    pub fn new(fetcher: F, store: S, base_url: &str) -> Self {
        Self {
            fetcher,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Forget everything recorded so far. Call at the start of each run.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Listing URL for one page of the publication index. `filter` is a raw
    /// query string such as `keywords=ilr&departments[]=home-office`.
    pub fn index_url(&self, page: usize, filter: Option<&str>) -> String {
        let mut url = format!("{}/government/publications?page={}", self.base_url, page);
        if let Some(filter) = filter
            .map(|f| f.trim_start_matches(['?', '&']))
            .filter(|f| !f.is_empty())
        {
            url.push('&');
            url.push_str(filter);
        }
        url
    }

    async fn fetch(&self, kind: EntityKind, url: &str) -> Result<String, ScrapeError> {
        self.fetcher
            .fetch(url)
            .await
            .map_err(|source| ScrapeError::Fetch {
                kind,
                url: url.to_string(),
                source,
            })
    }

    pub async fn scrape_and_save_organization(
        &mut self,
        url: &str,
    ) -> Result<Reconciled<Organization>, ScrapeError> {
        let name = name_for(EntityKind::Organization, url)?;
        let html = self.fetch(EntityKind::Organization, url).await?;
        let page = parse_organization_page(&html, url, &name, &mut self.stats.fields);
        let saved = reconcile::<Organization, _>(&self.store, &mut self.stats.organizations, page)?;
        info!("Organization {}: {}", name, saved.change.label());
        Ok(saved)
    }

    pub async fn scrape_and_save_collection(
        &mut self,
        url: &str,
    ) -> Result<Reconciled<Collection>, ScrapeError> {
        let name = name_for(EntityKind::Collection, url)?;
        let html = self.fetch(EntityKind::Collection, url).await?;
        let page = parse_collection_page(&html, url, &name, &mut self.stats.fields);

        let organization_id = match &page.organization_url {
            Some(org_url) => Some(self.resolve_organization(org_url).await?.id),
            None => None,
        };
        let draft = CollectionDraft {
            name: page.name,
            govuk_id: page.govuk_id,
            url: page.url,
            title: page.title,
            summary: page.summary,
            organization_id,
        };
        let saved = reconcile::<Collection, _>(&self.store, &mut self.stats.collections, draft)?;
        info!("Collection {}: {}", name, saved.change.label());
        Ok(saved)
    }

    /// Fetch, parse and save one publication together with any organization
    /// or collection it references that is not stored yet. Nothing is saved
    /// for the publication if a reference cannot be resolved.
    pub async fn scrape_and_save_publication(
        &mut self,
        url: &str,
    ) -> Result<Reconciled<Publication>, ScrapeError> {
        let name = name_for(EntityKind::Publication, url)?;
        let html = self.fetch(EntityKind::Publication, url).await?;
        let page = parse_publication_page(&html, url, &name, &mut self.stats.fields);

        let mut organizations = Vec::with_capacity(page.organization_urls.len());
        for org_url in &page.organization_urls {
            let org = self
                .resolve_organization(org_url)
                .await
                .map_err(|e| reference_error(EntityKind::Organization, org_url, &name, e))?;
            organizations.push(org);
        }
        let mut collections = Vec::with_capacity(page.collection_urls.len());
        for collection_url in &page.collection_urls {
            let collection = self
                .resolve_collection(collection_url)
                .await
                .map_err(|e| reference_error(EntityKind::Collection, collection_url, &name, e))?;
            collections.push(collection);
        }

        let draft = PublicationDraft::new(page, &organizations, &collections);
        let saved = reconcile::<Publication, _>(&self.store, &mut self.stats.publications, draft)?;
        info!("Publication {}: {}", name, saved.change.label());
        Ok(saved)
    }

    /// Known organizations are used as stored and never re-scraped.
    async fn resolve_organization(&mut self, url: &str) -> Result<Organization, ScrapeError> {
        let name = name_for(EntityKind::Organization, url)?;
        if let Some(org) = find_existing::<Organization, _>(&self.store, &name)? {
            return Ok(org);
        }
        Ok(self.scrape_and_save_organization(url).await?.entity)
    }

    async fn resolve_collection(&mut self, url: &str) -> Result<Collection, ScrapeError> {
        let name = name_for(EntityKind::Collection, url)?;
        if let Some(collection) = find_existing::<Collection, _>(&self.store, &name)? {
            return Ok(collection);
        }
        Ok(self.scrape_and_save_collection(url).await?.entity)
    }

    /// Walk the publication index in listing order and scrape every listed
    /// publication until the index runs out or `limit` publications have been
    /// attempted. A publication listed more than once is scraped once. Per-item
    /// failures are recorded in the run stats and skipped; only store failures
    /// end the run early. Returns the number attempted.
    pub async fn scrape_and_save_publications(
        &mut self,
        filter: Option<&str>,
        limit: Option<usize>,
    ) -> Result<usize, ScrapeError> {
        let pb = ProgressBar::new(limit.unwrap_or(0) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let mut attempted = 0usize;
        let mut listed = 0usize;
        let mut seen: HashSet<String> = HashSet::new();
        let mut total: Option<usize> = None;
        let mut consecutive_failures = 0usize;
        let mut page_no = 1usize;

        'pages: loop {
            if limit.is_some_and(|n| attempted >= n) {
                break;
            }
            let url = self.index_url(page_no, filter);
            let html = match self.fetcher.fetch(&url).await {
                Ok(html) => {
                    consecutive_failures = 0;
                    html
                }
                Err(e) => {
                    warn!("Index page {} failed: {}", page_no, e);
                    self.stats.fail(None, &url, &e);
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_INDEX_FAILURES {
                        warn!("Giving up after {} failed index pages", consecutive_failures);
                        break;
                    }
                    page_no += 1;
                    continue;
                }
            };

            let index = parse_index_page(&html, origin_of(&url), &mut self.stats.fields);
            if total.is_none() {
                total = index
                    .num_results
                    .as_deref()
                    .and_then(|n| n.replace(',', "").parse().ok());
                let expected = match (total, limit) {
                    (Some(t), Some(n)) => t.min(n),
                    (Some(t), None) => t,
                    (None, Some(n)) => n,
                    (None, None) => 0,
                };
                pb.set_length(expected as u64);
            }
            if index.listed == 0 {
                info!("Index page {} lists no publications, stopping", page_no);
                break;
            }
            info!(
                "Index page {}: {} publications ({} of {} so far)",
                page_no,
                index.publications.len(),
                attempted,
                index.num_results.as_deref().unwrap_or("?")
            );

            listed += index.listed;
            for basics in index.publications {
                if limit.is_some_and(|n| attempted >= n) {
                    break 'pages;
                }
                if !seen.insert(basics.name.clone()) {
                    debug!("Already scraped this run: {}", basics.name);
                    continue;
                }
                attempted += 1;
                pb.set_message(basics.name.clone());
                match self.scrape_and_save_publication(&basics.url).await {
                    Ok(_) => {}
                    Err(e @ ScrapeError::Store(_)) => {
                        pb.abandon();
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("Skipping {}: {}", basics.url, e);
                        self.stats.fail(Some(EntityKind::Publication), &basics.url, &e);
                    }
                }
                pb.inc(1);
            }

            if total.is_some_and(|t| listed >= t) {
                break;
            }
            page_no += 1;
        }

        pb.finish_and_clear();
        info!(
            "Scraped {} publications ({} failed)",
            attempted,
            self.stats.failures.len()
        );
        Ok(attempted)
    }
}

fn name_for(kind: EntityKind, url: &str) -> Result<String, ScrapeError> {
    name_from_url(url).ok_or_else(|| ScrapeError::UnrecognisedUrl {
        kind,
        url: url.to_string(),
    })
}

/// Store failures stay store failures so a broken database still ends the run.
fn reference_error(kind: EntityKind, url: &str, publication: &str, e: ScrapeError) -> ScrapeError {
    match e {
        ScrapeError::Store(_) => e,
        other => ScrapeError::Reference {
            kind,
            url: url.to_string(),
            publication: publication.to_string(),
            source: Box::new(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::db::Db;
    use crate::error::FetchError;
    use crate::model::{Change, ChangeSummary};

    const BASE: &str = "https://www.gov.uk";
    const PUB: &str = "https://www.gov.uk/government/publications/individualised-learner-record-ilr-check-that-data-is-accurate";
    const CSV_PUB: &str = "https://www.gov.uk/government/publications/skills-funding-agency-spend-over-25000-july-2014";
    const TWO_ORGS_PUB: &str = "https://www.gov.uk/government/publications/national-infrastructure-plan-2013";
    const ORG: &str = "https://www.gov.uk/government/organisations/skills-funding-agency";
    const IUK: &str = "https://www.gov.uk/government/organisations/infrastructure-uk";
    const COLL: &str = "https://www.gov.uk/government/collections/individualised-learner-record-ilr";
    const SPEND_COLL: &str = "https://www.gov.uk/government/collections/skills-funding-agency-spend-over-25000";

    /// Serves fixed bodies by URL and remembers every request.
    #[derive(Default)]
    struct MapFetcher {
        pages: HashMap<String, String>,
        requests: RefCell<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, url: &str, fixture: &str) -> Self {
            let body = std::fs::read_to_string(format!("tests/fixtures/{}.html", fixture)).unwrap();
            self.pages.insert(url.to_string(), body);
            self
        }

        fn with_body(mut self, url: &str, body: String) -> Self {
            self.pages.insert(url.to_string(), body);
            self
        }

        fn hits(&self, url: &str) -> usize {
            self.requests.borrow().iter().filter(|u| *u == url).count()
        }
    }

    impl Fetch for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requests.borrow_mut().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::HttpStatus {
                    url: url.to_string(),
                    status: reqwest::StatusCode::NOT_FOUND,
                })
        }
    }

    fn site() -> MapFetcher {
        MapFetcher::default()
            .with(PUB, "publication_page")
            .with(CSV_PUB, "publication_csv")
            .with(ORG, "organization_page")
            .with(COLL, "collection_page")
            .with(SPEND_COLL, "collection_page")
    }

    fn scraper(fetcher: MapFetcher) -> Scraper<MapFetcher, Db> {
        Scraper::new(fetcher, Db::open_in_memory().unwrap(), BASE)
    }

    fn index_html(count: &str, urls: &[&str]) -> String {
        let items: String = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                format!(
                    "<li id=\"publication_{}\"><h3><a href=\"{}\">Item {}</a></h3></li>",
                    i + 1,
                    url.trim_start_matches(BASE),
                    i + 1
                )
            })
            .collect();
        format!(
            "<html><body><div class=\"filter-results-summary\"><span class=\"count\">{}</span></div>\
             <ol class=\"document-list\">{}</ol></body></html>",
            count, items
        )
    }

    #[tokio::test]
    async fn new_publication_creates_its_references_then_nothing_changes() {
        let mut s = scraper(site());

        let first = s.scrape_and_save_publication(PUB).await.unwrap();
        assert_eq!(first.change, Change::Created);
        assert_eq!(
            first.summary(),
            ChangeSummary::from([
                ("publication", "Created".to_string()),
                ("attachments", "Add first 3 attachments".to_string()),
            ])
        );
        let stats = s.stats();
        assert_eq!(
            stats.publications.names("Created"),
            ["publications/individualised-learner-record-ilr-check-that-data-is-accurate"]
        );
        assert_eq!(stats.organizations.names("Created"), ["skills-funding-agency"]);
        assert_eq!(stats.collections.names("Created"), ["individualised-learner-record-ilr"]);

        let id = first.entity.id;
        assert_eq!(
            s.store().publication_organization_names(id).unwrap(),
            ["skills-funding-agency"]
        );
        assert_eq!(
            s.store().publication_collection_names(id).unwrap(),
            ["individualised-learner-record-ilr"]
        );
        let org: Organization = find_existing(s.store(), "skills-funding-agency").unwrap().unwrap();
        let coll: Collection =
            find_existing(s.store(), "individualised-learner-record-ilr").unwrap().unwrap();
        assert_eq!(coll.organization_id, Some(org.id));
        assert_eq!(first.entity.organization_ids, [org.id]);

        s.reset_stats();
        let second = s.scrape_and_save_publication(PUB).await.unwrap();
        assert_eq!(second.change, Change::Unchanged);
        assert!(second.summary().is_empty());
        assert!(s.stats().organizations.is_empty());
        assert!(s.stats().collections.is_empty());

        let counts = s.store().counts().unwrap();
        assert_eq!((counts.publications, counts.organizations, counts.collections), (1, 1, 1));
        assert_eq!(s.fetcher().hits(PUB), 2);
        assert_eq!(s.fetcher().hits(ORG), 1);
        assert_eq!(s.fetcher().hits(COLL), 1);
    }

    #[tokio::test]
    async fn shared_organization_is_created_once() {
        let mut s = scraper(site());
        s.scrape_and_save_publication(PUB).await.unwrap();
        s.scrape_and_save_publication(CSV_PUB).await.unwrap();

        assert_eq!(s.fetcher().hits(ORG), 1);
        assert_eq!(s.stats().organizations.names("Created"), ["skills-funding-agency"]);
        assert_eq!(s.stats().publications.names("Created").len(), 2);
        assert_eq!(s.store().counts().unwrap().organizations, 1);
    }

    #[tokio::test]
    async fn collection_rescrape_skips_known_organization() {
        let mut s = scraper(site());
        let first = s.scrape_and_save_collection(COLL).await.unwrap();
        assert_eq!(first.change, Change::Created);
        assert_eq!(s.stats().organizations.names("Created"), ["skills-funding-agency"]);

        s.reset_stats();
        let second = s.scrape_and_save_collection(COLL).await.unwrap();
        assert_eq!(second.change, Change::Unchanged);
        assert_eq!(s.stats().collections.names("Unchanged"), ["individualised-learner-record-ilr"]);
        assert!(s.stats().organizations.is_empty());
        assert_eq!(s.fetcher().hits(ORG), 1);
    }

    #[tokio::test]
    async fn organization_on_its_own() {
        let mut s = scraper(site());
        let saved = s.scrape_and_save_organization(ORG).await.unwrap();
        assert_eq!(saved.entity.govuk_id, Some(86));
        assert_eq!(saved.summary().get("organization").map(String::as_str), Some("Created"));
    }

    #[tokio::test]
    async fn failed_fetch_saves_nothing() {
        let mut s = scraper(MapFetcher::default());
        let err = s.scrape_and_save_publication(PUB).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch { kind: EntityKind::Publication, .. }));
        assert_eq!(err.kind(), Some(EntityKind::Publication));
        assert_eq!(s.store().counts().unwrap().publications, 0);
        assert!(s.stats().publications.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_reference_keeps_publication_out() {
        // hm-treasury is not served
        let mut s = scraper(
            MapFetcher::default()
                .with(TWO_ORGS_PUB, "publication_two_organizations")
                .with(IUK, "organization_page"),
        );
        let err = s.scrape_and_save_publication(TWO_ORGS_PUB).await.unwrap_err();
        match &err {
            ScrapeError::Reference { kind, url, publication, .. } => {
                assert_eq!(*kind, EntityKind::Organization);
                assert_eq!(url, "https://www.gov.uk/government/organisations/hm-treasury");
                assert_eq!(publication, "publications/national-infrastructure-plan-2013");
            }
            other => panic!("unexpected error: {}", other),
        }
        let counts = s.store().counts().unwrap();
        assert_eq!((counts.publications, counts.organizations), (0, 1));
    }

    #[tokio::test]
    async fn malformed_url_is_rejected_without_fetching() {
        let mut s = scraper(site());
        let err = s
            .scrape_and_save_publication("https://www.gov.uk/browse/tax")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::UnrecognisedUrl { .. }));
        assert!(s.fetcher().requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn index_run_respects_limit() {
        let missing = "https://www.gov.uk/government/publications/not-served";
        let index = index_html("3", &[PUB, CSV_PUB, missing]);
        let mut s = scraper(site().with_body(&s_index_url(1, None), index));

        let attempted = s.scrape_and_save_publications(None, Some(2)).await.unwrap();
        assert_eq!(attempted, 2);
        assert_eq!(s.stats().publications.names("Created").len(), 2);
        assert!(s.stats().failures.is_empty());
        assert_eq!(s.fetcher().hits(missing), 0);
    }

    #[tokio::test]
    async fn index_run_records_failures_and_stops_at_total() {
        let missing = "https://www.gov.uk/government/publications/not-served";
        let index = index_html("3", &[PUB, missing, CSV_PUB]);
        let mut s = scraper(site().with_body(&s_index_url(1, Some("keywords=ilr")), index));

        let attempted = s
            .scrape_and_save_publications(Some("keywords=ilr"), None)
            .await
            .unwrap();
        assert_eq!(attempted, 3);
        assert_eq!(s.stats().publications.names("Created").len(), 2);
        assert_eq!(s.stats().failures.len(), 1);
        assert_eq!(s.stats().failures[0].url, missing);
        assert_eq!(s.stats().failures[0].kind, Some(EntityKind::Publication));
        assert_eq!(s.fetcher().hits(&s_index_url(2, Some("keywords=ilr"))), 0);
    }

    #[tokio::test]
    async fn index_run_scrapes_a_repeated_listing_once() {
        let index = index_html("2", &[PUB, PUB]);
        let mut s = scraper(site().with_body(&s_index_url(1, None), index));

        let attempted = s.scrape_and_save_publications(None, None).await.unwrap();
        assert_eq!(attempted, 1);
        assert_eq!(s.stats().publications.total(), 1);
        assert_eq!(
            s.stats().publications.names("Created"),
            ["publications/individualised-learner-record-ilr-check-that-data-is-accurate"]
        );
        assert_eq!(s.fetcher().hits(PUB), 1);
        assert_eq!(s.fetcher().hits(&s_index_url(2, None)), 0);
    }

    #[tokio::test]
    async fn unlinked_index_items_count_toward_the_total() {
        let index = index_html("2", &[PUB]).replace(
            "<ol class=\"document-list\">",
            "<ol class=\"document-list\"><li><h3>Withdrawn publication</h3></li>",
        );
        let mut s = scraper(site().with_body(&s_index_url(1, None), index));

        let attempted = s.scrape_and_save_publications(None, None).await.unwrap();
        assert_eq!(attempted, 1);
        assert_eq!(s.stats().fields.count("Publication link not found"), 1);
        assert_eq!(s.fetcher().hits(&s_index_url(2, None)), 0);
        assert!(s.stats().failures.is_empty());
    }

    #[tokio::test]
    async fn index_run_gives_up_on_a_dead_index() {
        let mut s = scraper(MapFetcher::default());
        let attempted = s.scrape_and_save_publications(None, None).await.unwrap();
        assert_eq!(attempted, 0);
        assert_eq!(s.stats().failures.len(), MAX_CONSECUTIVE_INDEX_FAILURES);
        assert!(s.stats().failures.iter().all(|f| f.kind.is_none()));
    }

    #[test]
    fn index_urls() {
        assert_eq!(
            s_index_url(1, None),
            "https://www.gov.uk/government/publications?page=1"
        );
        assert_eq!(
            s_index_url(3, Some("?keywords=ilr")),
            "https://www.gov.uk/government/publications?page=3&keywords=ilr"
        );
    }

    fn s_index_url(page: usize, filter: Option<&str>) -> String {
        Scraper::new(MapFetcher::default(), Db::open_in_memory().unwrap(), "https://www.gov.uk/")
            .index_url(page, filter)
    }
}
