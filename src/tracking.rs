//! Per (country, source) bookmark of the newest article already ingested.

use crate::error::Result;
use crate::models::SourceTracking;
use crate::store::{RemoteStore, tracking_path};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct SourceTrackingStore<S> {
    store: Arc<S>,
}

impl<S: RemoteStore> SourceTrackingStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The current bookmark, or `None` when the pair has never been ingested.
    ///
    /// A record that exists but cannot be parsed is treated as absent and
    /// logged; the next successful run overwrites it.
    pub async fn get(&self, country: &str, source: &str) -> Result<Option<SourceTracking>> {
        let path = tracking_path(country, source);
        let Some(value) = self.store.get(&path).await? else {
            debug!(%path, "No tracking record yet");
            return Ok(None);
        };
        match serde_json::from_value::<SourceTracking>(value) {
            Ok(tracking) => Ok(Some(tracking)),
            Err(e) => {
                warn!(%path, error = %e, "Unreadable tracking record; treating as absent");
                Ok(None)
            }
        }
    }

    pub async fn update(&self, country: &str, source: &str, tracking: &SourceTracking) -> Result<()> {
        let path = tracking_path(country, source);
        self.store.set(&path, &serde_json::to_value(tracking)?).await?;
        info!(
            %path,
            latest_article_id = %tracking.latest_article_id,
            latest_published_unix = tracking.latest_published_unix,
            "Updated source tracking"
        );
        Ok(())
    }
}
