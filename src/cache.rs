//! Whitelist-gated, disk-backed cache of recent articles per country.
//!
//! The cache holds, for each whitelisted country, the articles most recently
//! pulled from the remote store, newest first. Its whole state (articles,
//! refresh times, whitelist) is one JSON document:
//!
//! ```text
//! {
//!   "articles":             { "USA": [ArticleRecord, ...], ... },
//!   "lastRefreshTime":      { "USA": 1736900000.123, ... },
//!   "whitelistedCountries": [ "USA", "UK", ... ]
//! }
//! ```
//!
//! The document is read when the cache is opened and rewritten in full after
//! every mutation, through a per-writer temporary file that is renamed over
//! the target. All state sits behind a single async mutex that is held across
//! that rewrite, so mutations are applied and persisted one at a time.
//!
//! Several processes may share one cache file. Each mutation also holds an
//! exclusive advisory lock on `<file>.lock` and reloads the document under
//! it before applying the change, so a write from another process is merged
//! rather than overwritten.
//!
//! # Invariants
//!
//! - Country keys are uppercase.
//! - Every cached country is whitelisted; shrinking the whitelist drops the
//!   affected entries within the same critical section and the same write.
//! - Each cached list is sorted by publication time, newest first.

use crate::error::{Error, Result};
use crate::models::{ArticleRecord, CacheStatus, RefreshTime, WhitelistUpdate};
use crate::utils::{format_epoch_local, now_epoch_secs};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CacheState {
    articles: BTreeMap<String, Vec<ArticleRecord>>,
    #[serde(alias = "last_refresh_time")]
    last_refresh_time: BTreeMap<String, f64>,
    #[serde(alias = "whitelisted_countries")]
    whitelisted_countries: BTreeSet<String>,
}

impl CacheState {
    /// Uppercase every key and drop whatever breaks whitelist containment.
    fn normalized(self) -> Self {
        let whitelisted_countries: BTreeSet<String> = self
            .whitelisted_countries
            .into_iter()
            .map(|c| normalize_country(&c))
            .filter(|c| !c.is_empty())
            .collect();

        let mut articles = BTreeMap::new();
        for (country, mut list) in self.articles {
            let country = normalize_country(&country);
            if whitelisted_countries.contains(&country) {
                sort_newest_first(&mut list);
                articles.insert(country, list);
            } else {
                warn!(%country, "Dropping cached country that is not whitelisted");
            }
        }

        let last_refresh_time = self
            .last_refresh_time
            .into_iter()
            .map(|(c, t)| (normalize_country(&c), t))
            .filter(|(c, _)| articles.contains_key(c))
            .collect();

        Self {
            articles,
            last_refresh_time,
            whitelisted_countries,
        }
    }

    fn total_articles(&self) -> usize {
        self.articles.values().map(Vec::len).sum()
    }
}

fn normalize_country(country: &str) -> String {
    country.trim().to_uppercase()
}

/// Stable: articles published in the same second keep their relative order.
fn sort_newest_first(articles: &mut [ArticleRecord]) {
    articles.sort_by(|a, b| b.published_unix().cmp(&a.published_unix()));
}

/// What was found at the cache path.
enum Loaded {
    Missing,
    Parsed(CacheState),
    Unusable,
}

async fn load_state(path: &Path) -> Loaded {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<CacheState>(&bytes) {
            Ok(state) => Loaded::Parsed(state.normalized()),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Cache file is corrupt");
                Loaded::Unusable
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Loaded::Missing,
        Err(e) => {
            error!(path = %path.display(), error = %e, "Cache file unreadable");
            Loaded::Unusable
        }
    }
}

/// Exclusive lock on the cache's `.lock` sibling; released on drop.
struct WriteLock {
    _file: std::fs::File,
}

#[derive(Debug)]
pub struct ArticleCache {
    path: PathBuf,
    lock_path: PathBuf,
    state: Mutex<CacheState>,
}

impl ArticleCache {
    /// Open the cache backed by `path`.
    ///
    /// A missing file gives an empty cache. An unreadable or unparseable file
    /// also gives an empty cache; the problem is logged and the file is left
    /// in place until the next write replaces it.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match load_state(&path).await {
            Loaded::Parsed(state) => {
                info!(
                    countries = state.articles.len(),
                    whitelisted = state.whitelisted_countries.len(),
                    total_articles = state.total_articles(),
                    "Loaded article cache"
                );
                state
            }
            Loaded::Missing => {
                info!("No cache file yet; starting with an empty cache");
                CacheState::default()
            }
            Loaded::Unusable => {
                warn!("Starting with an empty cache");
                CacheState::default()
            }
        };

        Self {
            lock_path: sibling(&path, "lock"),
            path,
            state: Mutex::new(state),
        }
    }

    /// Cached articles for `country`, newest first.
    ///
    /// `None` means the country is not cached, which is different from a
    /// country cached with zero articles (`Some(vec![])`).
    pub async fn get(&self, country: &str) -> Option<Vec<ArticleRecord>> {
        let country = normalize_country(country);
        let state = self.state.lock().await;
        match state.articles.get(&country) {
            Some(articles) => {
                let newest = articles.first().map(|a| a.metadata.date_published.as_str());
                let oldest = articles.last().map(|a| a.metadata.date_published.as_str());
                info!(%country, count = articles.len(), ?newest, ?oldest, "Cache hit");
                Some(articles.clone())
            }
            None => {
                info!(%country, "Cache miss");
                None
            }
        }
    }

    /// Replace the cached articles for `country` and persist.
    ///
    /// Returns `Ok(false)` without touching anything when `country` is not
    /// whitelisted. The list is stored in full; callers limit it beforehand.
    ///
    /// # Errors
    ///
    /// Fails if the write lock cannot be taken or the cache file cannot be
    /// written. In the latter case this handle still serves the update until
    /// its next mutation reloads the file.
    #[instrument(level = "info", skip(self, articles), fields(count = articles.len()))]
    pub async fn set(&self, country: &str, mut articles: Vec<ArticleRecord>) -> Result<bool> {
        let country = normalize_country(country);
        let mut state = self.state.lock().await;
        let _lock = self.lock_and_reload(&mut state).await?;
        if !state.whitelisted_countries.contains(&country) {
            warn!(%country, "Country is not whitelisted; skipping cache update");
            return Ok(false);
        }

        sort_newest_first(&mut articles);
        if articles.is_empty() {
            warn!(%country, "Caching an empty article list");
        }
        state.articles.insert(country.clone(), articles);
        state.last_refresh_time.insert(country.clone(), now_epoch_secs());
        info!(%country, "Cache updated");

        self.persist(&state).await?;
        Ok(true)
    }

    /// Replace the whitelist, dropping cache entries for removed countries.
    #[instrument(level = "info", skip_all)]
    pub async fn set_whitelist<I, S>(&self, countries: I) -> Result<WhitelistUpdate>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next: BTreeSet<String> = countries
            .into_iter()
            .map(|c| normalize_country(c.as_ref()))
            .filter(|c| !c.is_empty())
            .collect();

        let mut state = self.state.lock().await;
        let _lock = self.lock_and_reload(&mut state).await?;
        let added: Vec<String> = next
            .difference(&state.whitelisted_countries)
            .cloned()
            .collect();
        let removed: Vec<String> = state
            .whitelisted_countries
            .difference(&next)
            .cloned()
            .collect();

        for country in &removed {
            if state.articles.remove(country).is_some() {
                info!(%country, "Removed country from cache; no longer whitelisted");
            }
            state.last_refresh_time.remove(country);
        }
        state.whitelisted_countries = next;
        info!(?added, ?removed, "Whitelist replaced");

        let update = WhitelistUpdate {
            whitelisted_countries: state.whitelisted_countries.iter().cloned().collect(),
            added,
            removed,
        };
        self.persist(&state).await?;
        Ok(update)
    }

    /// Whitelisted countries in sorted order.
    pub async fn whitelist(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.whitelisted_countries.iter().cloned().collect()
    }

    pub async fn is_whitelisted(&self, country: &str) -> bool {
        let state = self.state.lock().await;
        state.whitelisted_countries.contains(&normalize_country(country))
    }

    pub async fn status(&self) -> CacheStatus {
        let state = self.state.lock().await;
        let cached = state.articles.len();
        let whitelisted = state.whitelisted_countries.len();
        CacheStatus {
            cached_countries: state.articles.keys().cloned().collect(),
            whitelisted_countries: state.whitelisted_countries.iter().cloned().collect(),
            total_articles: state.total_articles(),
            articles_per_country: state
                .articles
                .iter()
                .map(|(c, a)| (c.clone(), a.len()))
                .collect(),
            cache_coverage: format!("{cached}/{whitelisted}"),
            coverage_ratio: if whitelisted == 0 {
                0.0
            } else {
                cached as f64 / whitelisted as f64
            },
            last_refresh_time: state
                .last_refresh_time
                .iter()
                .map(|(c, &t)| {
                    (
                        c.clone(),
                        RefreshTime {
                            timestamp: t,
                            formatted: format_epoch_local(t),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Drop every cached country; the whitelist stays.
    #[instrument(level = "info", skip_all)]
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let _lock = self.lock_and_reload(&mut state).await?;
        warn!(
            countries = state.articles.len(),
            total_articles = state.total_articles(),
            "Clearing article cache"
        );
        state.articles.clear();
        state.last_refresh_time.clear();
        self.persist(&state).await
    }

    /// Take the cross-process write lock, then replace `state` with what is
    /// on disk. A missing or unusable file keeps the in-memory state, which
    /// the write that follows turns into the file's new content.
    async fn lock_and_reload(&self, state: &mut CacheState) -> Result<WriteLock> {
        let lock_path = self.lock_path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            if let Some(parent) = lock_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        if let Loaded::Parsed(on_disk) = load_state(&self.path).await {
            debug!(
                countries = on_disk.articles.len(),
                whitelisted = on_disk.whitelisted_countries.len(),
                "Reloaded article cache under write lock"
            );
            *state = on_disk;
        }
        Ok(WriteLock { _file: file })
    }

    /// Write the whole state to a temp file named for this process, then
    /// rename it over the cache file. Called with both locks held.
    async fn persist(&self, state: &CacheState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp_path = sibling(&self.path, &format!("{}.tmp", std::process::id()));

        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if let Err(e) = written {
            error!(path = %self.path.display(), error = %e, "Failed to persist article cache");
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        info!(
            path = %self.path.display(),
            kb = bytes.len() / 1024,
            countries = state.articles.len(),
            "Persisted article cache"
        );
        Ok(())
    }
}

/// `dir/name.json` → `dir/name.json.{suffix}`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "article_cache.json".to_string());
    path.with_file_name(format!("{file_name}.{suffix}"))
}
