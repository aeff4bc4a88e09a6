//! The operations exposed to clients, composed from the cache, the remote
//! store and the refresh orchestrator.
//!
//! Reads are served from the cache whenever it can answer them: a request
//! for at most `retention` articles of a cached country never touches the
//! remote store. Larger requests and cache misses go to the remote store and
//! leave the cache as it was; only [`ArticleService::refresh`] fills it.

use crate::cache::ArticleCache;
use crate::error::{Error, Result};
use crate::models::{ArticleSource, ArticlesResponse, CacheStatus, RefreshReport, WhitelistUpdate};
use crate::refresh::Orchestrator;
use crate::store::{RemoteStore, country_articles_path, recent_articles};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

pub struct ArticleService<S> {
    store: Arc<S>,
    cache: Arc<ArticleCache>,
    orchestrator: Orchestrator<S>,
    retention: usize,
}

impl<S: RemoteStore> ArticleService<S> {
    pub fn new(store: Arc<S>, cache: Arc<ArticleCache>, retention: usize) -> Self {
        Self {
            orchestrator: Orchestrator::new(Arc::clone(&store), Arc::clone(&cache), retention),
            store,
            cache,
            retention,
        }
    }

    /// Install `defaults` as the whitelist when none is set yet.
    pub async fn ensure_default_whitelist(&self, defaults: &[String]) -> Result<()> {
        if self.cache.whitelist().await.is_empty() && !defaults.is_empty() {
            info!(?defaults, "Whitelist empty; installing defaults");
            self.cache.set_whitelist(defaults).await?;
        }
        Ok(())
    }

    /// The most recent `limit` articles for `country`, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] when `limit` is outside `1..=100`; otherwise
    /// only remote-store failures on the uncached path.
    #[instrument(level = "info", skip(self))]
    pub async fn get_articles(&self, country: &str, limit: usize) -> Result<ArticlesResponse> {
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(Error::InvalidRequest(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {limit}"
            )));
        }
        let country = country.trim().to_uppercase();
        if country.is_empty() {
            return Err(Error::InvalidRequest("country must not be empty".to_string()));
        }

        let cached = if limit > self.retention {
            info!(limit, retention = self.retention, "Limit above cache retention; reading remote store");
            None
        } else {
            self.cache.get(&country).await
        };

        let (source, articles) = match cached {
            Some(mut articles) => {
                articles.truncate(limit);
                (ArticleSource::Cache, articles)
            }
            None => (
                ArticleSource::Remote,
                recent_articles(&*self.store, &country, limit).await?,
            ),
        };

        info!(count = articles.len(), ?source, "Serving articles");
        Ok(ArticlesResponse {
            country,
            count: articles.len(),
            limit,
            source,
            articles,
        })
    }

    pub async fn refresh<I, C>(&self, countries: I) -> RefreshReport
    where
        I: IntoIterator<Item = C>,
        C: AsRef<str>,
    {
        self.orchestrator.refresh(countries).await
    }

    pub async fn refresh_all(&self) -> RefreshReport {
        self.orchestrator.refresh_all().await
    }

    pub async fn set_whitelist<I, C>(&self, countries: I) -> Result<WhitelistUpdate>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<str>,
    {
        self.cache.set_whitelist(countries).await
    }

    pub async fn whitelist(&self) -> Vec<String> {
        self.cache.whitelist().await
    }

    pub async fn cache_status(&self) -> CacheStatus {
        self.cache.status().await
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }

    /// Everything stored remotely for `country`, unprocessed; `{}` if nothing.
    #[instrument(level = "info", skip(self))]
    pub async fn all_articles(&self, country: &str) -> Result<Value> {
        let value = self.store.get(&country_articles_path(country)).await?;
        Ok(value.unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// The whole remote database (articles and tracking), unprocessed; `{}`
    /// if it is empty.
    #[instrument(level = "info", skip(self))]
    pub async fn all_data(&self) -> Result<Value> {
        let value = self.store.get("").await?;
        Ok(value.unwrap_or_else(|| Value::Object(Map::new())))
    }
}
