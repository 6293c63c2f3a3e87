use reqwest::StatusCode;

use crate::model::EntityKind;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for {url}")]
    HttpStatus { url: String, status: StatusCode },
    #[error("cache error: {0}")]
    Cache(#[from] rusqlite::Error),
    #[error("cache directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{kind} {name} vanished from the store")]
    Missing { kind: EntityKind, name: String },
}

/// Failure to scrape or save one entity. Always names the URL or kind involved
/// so the caller can log it and retry later.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    #[error("failed to fetch {kind} {url}: {source}")]
    Fetch {
        kind: EntityKind,
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("unrecognised {kind} url: {url}")]
    UnrecognisedUrl { kind: EntityKind, url: String },
    #[error("could not resolve {kind} {url} referenced by {publication}: {source}")]
    Reference {
        kind: EntityKind,
        url: String,
        publication: String,
        #[source]
        source: Box<ScrapeError>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScrapeError {
    /// The entity kind the failing operation was working on.
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            Self::Fetch { kind, .. }
            | Self::UnrecognisedUrl { kind, .. }
            | Self::Reference { kind, .. } => Some(*kind),
            Self::Store(StoreError::Missing { kind, .. }) => Some(*kind),
            Self::Store(_) => None,
        }
    }
}
