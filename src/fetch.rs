//! Page fetching: plain HTTP, and a SQLite-backed response cache that wraps
//! any fetcher.

use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::FetchError;

/// Fetch the HTML text behind a URL.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFetcher {
    http: reqwest::Client,
    delay: Duration,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration, delay: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, delay })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let resp = self
            .http
            .get(url)
            .header("accept", "text/html,application/xhtml+xml")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: resp.status(),
            });
        }

        Ok(resp.text().await?)
    }
}

/// Serves bodies from the cache while they are younger than `max_age` (or
/// forever without one), and fetches through `inner` otherwise. Only
/// successful responses are stored.
pub struct CachedFetcher<F> {
    inner: F,
    conn: Connection,
    max_age: Option<chrono::Duration>,
}

impl<F: Fetch> CachedFetcher<F> {
    pub fn open(path: &Path, inner: F, max_age: Option<chrono::Duration>) -> Result<Self, FetchError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Self::with_connection(Connection::open(path)?, inner, max_age)
    }

    pub fn open_in_memory(inner: F, max_age: Option<chrono::Duration>) -> Result<Self, FetchError> {
        Self::with_connection(Connection::open_in_memory()?, inner, max_age)
    }

    fn with_connection(
        conn: Connection,
        inner: F,
        max_age: Option<chrono::Duration>,
    ) -> Result<Self, FetchError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS html_cache (
                url        TEXT PRIMARY KEY,
                body       TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { inner, conn, max_age })
    }

    fn lookup(&self, url: &str) -> Result<Option<String>, FetchError> {
        let row: Option<(String, NaiveDateTime)> = self
            .conn
            .query_row(
                "SELECT body, fetched_at FROM html_cache WHERE url = ?1",
                [url],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((body, fetched_at)) = row else {
            return Ok(None);
        };
        if let Some(max_age) = self.max_age {
            if Utc::now().naive_utc() - fetched_at > max_age {
                debug!("Cache stale: {}", url);
                return Ok(None);
            }
        }
        Ok(Some(body))
    }

    fn store(&self, url: &str, body: &str) -> Result<(), FetchError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO html_cache (url, body, fetched_at) VALUES (?1, ?2, ?3)",
            params![url, body, Utc::now().naive_utc()],
        )?;
        Ok(())
    }
}

impl<F: Fetch> Fetch for CachedFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        if let Some(body) = self.lookup(url)? {
            debug!("Cache hit: {}", url);
            return Ok(body);
        }
        let body = self.inner.fetch(url).await?;
        self.store(url, &body)?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http() -> HttpFetcher {
        HttpFetcher::new("govuk_scraper-test", Duration::from_secs(5), Duration::ZERO).unwrap()
    }

    #[tokio::test]
    async fn http_fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/government/publications/x"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>x</html>"))
            .mount(&server)
            .await;

        let url = format!("{}/government/publications/x", server.uri());
        assert_eq!(http().fetch(&url).await.unwrap(), "<html>x</html>");
    }

    #[tokio::test]
    async fn http_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/government/publications/gone", server.uri());
        let err = http().fetch(&url).await.unwrap_err();
        assert!(
            matches!(err, FetchError::HttpStatus { status, .. } if status == reqwest::StatusCode::NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn cache_serves_repeat_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/government/organisations/home-office"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Home Office</h1>"))
            .expect(1)
            .mount(&server)
            .await;

        let cached = CachedFetcher::open_in_memory(http(), None).unwrap();
        let url = format!("{}/government/organisations/home-office", server.uri());
        assert_eq!(cached.fetch(&url).await.unwrap(), "<h1>Home Office</h1>");
        assert_eq!(cached.fetch(&url).await.unwrap(), "<h1>Home Office</h1>");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let cached = CachedFetcher::open_in_memory(http(), None).unwrap();
        let url = format!("{}/government/publications/flaky", server.uri());
        assert!(cached.fetch(&url).await.is_err());
        assert!(cached.fetch(&url).await.is_err());
    }

    #[tokio::test]
    async fn stale_entries_are_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let cached =
            CachedFetcher::open_in_memory(http(), Some(chrono::Duration::hours(1))).unwrap();
        let url = format!("{}/government/publications/old", server.uri());
        let old = Utc::now().naive_utc() - chrono::Duration::hours(2);
        cached
            .conn
            .execute(
                "INSERT INTO html_cache (url, body, fetched_at) VALUES (?1, 'stale', ?2)",
                params![url, old],
            )
            .unwrap();

        assert_eq!(cached.fetch(&url).await.unwrap(), "fresh");
        assert_eq!(cached.fetch(&url).await.unwrap(), "fresh");
    }
}
