//! Runtime configuration.
//!
//! Settings come from an optional YAML file; anything the file leaves out falls
//! back to [`Config::default`]. Command-line flags are applied on top of the
//! loaded file in `main` (see [`Config::apply_overrides`]).
//!
//! ```yaml
//! database_url: https://example-default-rtdb.firebaseio.com
//! cache_file: data/article_cache.json
//! scrapers_dir: scrapers
//! scraper_timeout_secs: 300
//! default_whitelist: [USA, UK, CANADA, AUSTRALIA, INDIA]
//! sources:
//!   ocote: guatemala
//!   correctiv: germany
//! ```

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Source names become directory names and remote-store path segments.
static SOURCE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("source name pattern compiles"));

/// Source → country for the scrapers shipped with the project.
static DEFAULT_SOURCES: Lazy<BTreeMap<String, String>> = Lazy::new(|| {
    [
        ("ocote", "guatemala"),
        ("greecefactcheck", "greece"),
        ("actionfordemocraticsociety", "kosovo"),
        ("boom", "india"),
        ("cablecheck", "nigeria"),
        ("cotejoinfo", "venezuela"),
        ("digiteye", "india"),
        ("annielab", "hongkong"),
        ("cazadoresdefakenews", "venezuela"),
        ("checkyourfact", "united states"),
        ("demagogassociation", "poland"),
        ("ecuadorchequea", "ecuador"),
        ("efectochequea", "ecuador"),
        ("ellinikahoaxes", "greece"),
    ]
    .into_iter()
    .map(|(s, c)| (s.to_string(), c.to_string()))
    .collect()
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Firebase Realtime Database.
    pub database_url: Option<String>,
    /// Database secret or ID token, sent as the `auth` query parameter.
    pub auth_token: Option<String>,
    pub cache_file: PathBuf,
    pub scrapers_dir: PathBuf,
    /// Program and arguments run inside each scraper's directory.
    pub scraper_command: Vec<String>,
    pub scraper_timeout_secs: u64,
    pub remote_timeout_secs: u64,
    pub remote_retries: usize,
    pub remote_retry_base_ms: u64,
    /// Articles kept per cached country; also the refresh fetch size.
    pub cache_retention: usize,
    pub default_whitelist: Vec<String>,
    /// Source (scraper) name → country it reports on.
    pub sources: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            auth_token: None,
            cache_file: PathBuf::from("data/article_cache.json"),
            scrapers_dir: PathBuf::from("scrapers"),
            scraper_command: vec!["python".to_string(), "scraper.py".to_string()],
            scraper_timeout_secs: 300,
            remote_timeout_secs: 15,
            remote_retries: 3,
            remote_retry_base_ms: 500,
            cache_retention: 10,
            default_whitelist: ["USA", "UK", "CANADA", "AUSTRALIA", "INDIA"]
                .into_iter()
                .map(String::from)
                .collect(),
            sources: DEFAULT_SOURCES.clone(),
        }
    }
}

/// Values given on the command line, which win over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub auth_token: Option<String>,
    pub cache_file: Option<PathBuf>,
    pub scrapers_dir: Option<PathBuf>,
}

impl Config {
    /// Load from `path` when given, otherwise start from defaults. The result
    /// is validated either way.
    #[instrument(level = "info", skip_all, fields(path = ?path))]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                let config: Config = serde_yaml::from_str(&text)?;
                info!(sources = config.sources.len(), "Loaded configuration file");
                config
            }
            None => Config::default(),
        };
        config.validated()
    }

    pub fn apply_overrides(mut self, overrides: Overrides) -> Self {
        if overrides.database_url.is_some() {
            self.database_url = overrides.database_url;
        }
        if overrides.auth_token.is_some() {
            self.auth_token = overrides.auth_token;
        }
        if let Some(cache_file) = overrides.cache_file {
            self.cache_file = cache_file;
        }
        if let Some(scrapers_dir) = overrides.scrapers_dir {
            self.scrapers_dir = scrapers_dir;
        }
        self
    }

    fn validated(mut self) -> Result<Self> {
        if self.scraper_command.is_empty() {
            return Err(Error::Config("scraper_command must not be empty".to_string()));
        }
        if self.cache_retention == 0 {
            return Err(Error::Config("cache_retention must be at least 1".to_string()));
        }
        let mut sources = BTreeMap::new();
        for (source, country) in self.sources {
            let source = source.to_lowercase();
            if !is_valid_source_name(&source) {
                return Err(Error::Config(format!("invalid source name: {source:?}")));
            }
            let country = country.trim().to_lowercase();
            if country.is_empty() {
                return Err(Error::Config(format!("source {source} has no country")));
            }
            sources.insert(source, country);
        }
        self.sources = sources;
        Ok(self)
    }

    pub fn scraper_timeout(&self) -> Duration {
        Duration::from_secs(self.scraper_timeout_secs)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn remote_retry_base(&self) -> Duration {
        Duration::from_millis(self.remote_retry_base_ms)
    }
}

pub fn is_valid_source_name(name: &str) -> bool {
    SOURCE_NAME.is_match(name)
}
