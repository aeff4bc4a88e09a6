//! Refreshing cached countries from the remote store.
//!
//! Each requested country is handled on its own: a bounded read of its most
//! recent articles followed by a cache write. Countries run concurrently, a
//! few at a time, and one country's failure is recorded in its own result
//! without affecting the rest.

use crate::cache::ArticleCache;
use crate::models::{CountryRefresh, RefreshReport};
use crate::store::{RemoteStore, recent_articles};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{error, info, instrument};

const DEFAULT_PARALLELISM: usize = 4;

pub struct Orchestrator<S> {
    store: Arc<S>,
    cache: Arc<ArticleCache>,
    /// Articles fetched and cached per country.
    retention: usize,
    parallelism: usize,
}

impl<S: RemoteStore> Orchestrator<S> {
    pub fn new(store: Arc<S>, cache: Arc<ArticleCache>, retention: usize) -> Self {
        Self {
            store,
            cache,
            retention,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Refresh the given countries.
    ///
    /// Names are uppercased and deduplicated first. Countries outside the
    /// whitelist are listed under `skipped` and not fetched.
    #[instrument(level = "info", skip_all)]
    pub async fn refresh<I, C>(&self, countries: I) -> RefreshReport
    where
        I: IntoIterator<Item = C>,
        C: AsRef<str>,
    {
        let requested: Vec<String> = countries
            .into_iter()
            .map(|c| c.as_ref().trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unique()
            .collect();

        let mut eligible = Vec::new();
        let mut skipped = Vec::new();
        for country in requested {
            if self.cache.is_whitelisted(&country).await {
                eligible.push(country);
            } else {
                skipped.push(country);
            }
        }
        if !skipped.is_empty() {
            info!(?skipped, "Skipping countries outside the whitelist");
        }

        let results = stream::iter(eligible)
            .map(|country| async move {
                let outcome = self.refresh_country(&country).await;
                (country, outcome)
            })
            .buffer_unordered(self.parallelism)
            .collect::<Vec<_>>()
            .await;

        let report = RefreshReport {
            results: results.into_iter().collect(),
            skipped,
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            total_articles = report.total_articles(),
            skipped = report.skipped.len(),
            "Refresh complete"
        );
        report
    }

    /// Refresh every whitelisted country.
    pub async fn refresh_all(&self) -> RefreshReport {
        let countries = self.cache.whitelist().await;
        self.refresh(countries).await
    }

    async fn refresh_country(&self, country: &str) -> CountryRefresh {
        let articles = match recent_articles(&*self.store, country, self.retention).await {
            Ok(articles) => articles,
            Err(e) => {
                error!(%country, error = %e, "Failed to fetch articles");
                return CountryRefresh::Error {
                    message: e.to_string(),
                };
            }
        };

        let article_count = articles.len();
        match self.cache.set(country, articles).await {
            Ok(true) => {
                info!(%country, article_count, "Country refreshed");
                CountryRefresh::Success { article_count }
            }
            Ok(false) => CountryRefresh::Error {
                message: format!("{country} is no longer whitelisted"),
            },
            Err(e) => {
                error!(%country, error = %e, "Failed to persist refreshed articles");
                CountryRefresh::Error {
                    message: e.to_string(),
                }
            }
        }
    }
}
