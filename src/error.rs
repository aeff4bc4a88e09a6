//! Crate-wide error type.
//!
//! "Not found" outcomes (an uncached country, a country outside the whitelist,
//! a missing tracking record) are never errors; they come back as `Option`,
//! `bool` or empty collections. Everything in this enum is a real failure:
//! upstream I/O, a remote store that refused or timed out, a scraper that
//! never produced output, or a request the caller should not have made.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store returned {status} for {path}: {body}")]
    Remote {
        path: String,
        status: u16,
        body: String,
    },

    #[error("Timed out after {secs}s: {what}")]
    Timeout { what: String, secs: u64 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Scraper error: {0}")]
    Scraper(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether retrying the same remote call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout { .. } | Error::Io(_) => true,
            Error::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
