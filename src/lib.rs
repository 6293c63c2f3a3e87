//! Scraper for GOV.UK publications, collections and organisations, with a
//! reconciliation engine that keeps a SQLite store in sync with the site.

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod fields;
pub mod model;
pub mod parser;
pub mod reconcile;
pub mod scraper;
pub mod stats;
pub mod store;
