use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

/// Runtime settings: built-in defaults, then `govuk_scraper.toml` if present,
/// then `GOVUK_*` environment variables (e.g. `GOVUK_DB_PATH`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub db_path: PathBuf,
    pub cache_path: PathBuf,
    /// Cached pages older than this are fetched again. Unset: never expire.
    pub cache_max_age_hours: Option<i64>,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub request_delay_ms: u64,
}

impl Settings {
    pub fn load() -> Result<Settings, ConfigError> {
        with_defaults(Config::builder())?
            .add_source(File::with_name("govuk_scraper").required(false))
            .add_source(Environment::with_prefix("GOVUK"))
            .build()?
            .try_deserialize()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn cache_max_age(&self) -> Option<chrono::Duration> {
        self.cache_max_age_hours.map(chrono::Duration::hours)
    }
}

fn with_defaults<St: config::builder::BuilderState>(
    builder: ConfigBuilder<St>,
) -> Result<ConfigBuilder<St>, ConfigError> {
    builder
        .set_default("base_url", "https://www.gov.uk")?
        .set_default("db_path", "data/govuk.sqlite")?
        .set_default("cache_path", "data/html_cache.sqlite")?
        .set_default("user_agent", concat!("govuk_scraper/", env!("CARGO_PKG_VERSION")))?
        .set_default("timeout_secs", 30)?
        .set_default("request_delay_ms", 0)
}
