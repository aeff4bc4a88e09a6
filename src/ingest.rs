//! Ingestion driver: scraper runs feeding the pipeline, several sources at a
//! time.
//!
//! ```text
//! for each source (4 in flight):
//!     ScraperRunner::run(source) -> ScraperDocument
//!     Pipeline::ingest(country, source, document) -> IngestReport
//! ```
//!
//! A failing source is recorded in the run summary and never stops the others.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{IngestReport, IngestRun, SourceRun};
use crate::pipeline::Pipeline;
use crate::scrapers::{ScraperRunner, read_document};
use crate::store::RemoteStore;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const PARALLEL_SOURCES: usize = 4;

pub struct IngestDriver<S> {
    runner: ScraperRunner,
    pipeline: Arc<Pipeline<S>>,
    /// Source → country.
    sources: BTreeMap<String, String>,
}

impl<S: RemoteStore> IngestDriver<S> {
    pub fn new(
        runner: ScraperRunner,
        pipeline: Arc<Pipeline<S>>,
        sources: BTreeMap<String, String>,
    ) -> Self {
        Self {
            runner,
            pipeline,
            sources,
        }
    }

    pub fn from_config(config: &Config, store: Arc<S>) -> Self {
        Self::new(
            ScraperRunner::from_config(config),
            Arc::new(Pipeline::new(store)),
            config.sources.clone(),
        )
    }

    /// Run and ingest the `selected` sources, or every configured source when
    /// `selected` is empty. Names are matched case-insensitively and each
    /// source runs once. Results come back in source order.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self, selected: &[String], force: bool) -> IngestRun {
        let started_at = Utc::now();
        let sources: Vec<String> = if selected.is_empty() {
            self.sources.keys().cloned().collect()
        } else {
            selected
                .iter()
                .map(|s| s.trim().to_lowercase())
                .unique()
                .collect()
        };
        info!(count = sources.len(), ?sources, "Starting ingestion");

        let mut runs: Vec<SourceRun> = stream::iter(sources)
            .map(|source| async move { self.run_source(source, force).await })
            .buffer_unordered(PARALLEL_SOURCES)
            .collect()
            .await;
        runs.sort_by(|a, b| a.source.cmp(&b.source));

        let run = IngestRun {
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            sources: runs,
        };
        info!(
            written = run.total_written(),
            failed_sources = run.failed_sources(),
            skipped_sources = run.skipped_sources(),
            "Ingestion complete"
        );
        run
    }

    async fn run_source(&self, source: String, force: bool) -> SourceRun {
        let Some(country) = self.sources.get(&source).cloned() else {
            warn!(%source, "Source is not configured");
            return SourceRun {
                source,
                country: String::new(),
                skipped: false,
                report: None,
                error: Some("source is not configured".to_string()),
            };
        };

        let outcome = match self.runner.run(&source).await {
            Ok(Some(document)) => self
                .pipeline
                .ingest(&country, &source, &document, force)
                .await
                .map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(report)) => SourceRun {
                source,
                country,
                skipped: false,
                report: Some(report),
                error: None,
            },
            Ok(None) => SourceRun {
                source,
                country,
                skipped: true,
                report: None,
                error: None,
            },
            Err(e) => {
                error!(%source, %country, error = %e, "Source ingestion failed");
                SourceRun {
                    source,
                    country,
                    skipped: false,
                    report: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Ingest an already-produced scraper document for `source`.
    #[instrument(level = "info", skip(self))]
    pub async fn ingest_file(&self, source: &str, path: &Path, force: bool) -> Result<IngestReport> {
        let source = source.trim().to_lowercase();
        let country = self
            .sources
            .get(&source)
            .ok_or_else(|| Error::InvalidRequest(format!("source {source} is not configured")))?;
        let document = read_document(path).await?;
        self.pipeline.ingest(country, &source, &document, force).await
    }
}
