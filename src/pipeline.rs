//! Deduplication and transformation of scraper output into stored articles.
//!
//! One batch is one scraper document for one (country, source) pair:
//!
//! 1. Read the pair's tracking bookmark (a failed read fails the batch)
//! 2. Parse each entry; entries without a title or url are skipped
//! 3. Unless forced, drop entries published at or before the bookmark
//! 4. Transform the rest and sort them oldest first
//! 5. Write each under `articles/{country}/{id}`, counting failures
//! 6. Move the bookmark to the newest article that was actually written
//!
//! Batches for the same pair are serialized; different pairs run in parallel.

use crate::error::Result;
use crate::models::{
    ArticleContent, ArticleMetadata, ArticleRecord, FactCheck, IngestReport, Media, RawArticle,
    ScraperDocument, SourceTracking,
};
use crate::store::{RemoteStore, article_path};
use crate::tracking::SourceTrackingStore;
use crate::utils::format_date_utc;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const DEFAULT_LANGUAGE: &str = "es";

/// Stable identifier for an article: the first 16 bytes of
/// `SHA-256(title|url|source)` rendered as a UUID.
pub fn article_id(title: &str, url: &str, source: &str) -> String {
    let digest = Sha256::digest(format!("{title}|{url}|{source}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Build the stored record from a scraper entry.
///
/// Callers have already checked that title and url are present.
pub fn transform(raw: &RawArticle, source: &str, now: DateTime<Utc>) -> ArticleRecord {
    let url = raw.url.clone().unwrap_or_default();
    let published = raw.published_unix();
    let language = raw
        .language
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_lowercase();
    let locations = raw
        .organization_country
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| vec![c.to_lowercase()])
        .unwrap_or_default();

    ArticleRecord {
        id: None,
        metadata: ArticleMetadata {
            title: raw.title.clone().unwrap_or_default(),
            source: source.to_lowercase(),
            date_published: format_date_utc(published),
            date_published_unix: published,
            date_added: now.format("%Y-%m-%d").to_string(),
            date_added_unix: now.timestamp(),
            url: url.clone(),
            language,
            author: raw.author.clone().unwrap_or_default(),
        },
        content: ArticleContent {
            article_text: raw.text.clone().unwrap_or_default(),
            hyper_links: vec![url],
            locations,
            ..Default::default()
        },
        fact_check: FactCheck::default(),
        media: Media::default(),
    }
}

/// An entry that made it past parsing and deduplication.
struct Candidate {
    id: String,
    record: ArticleRecord,
}

type PairLock = Arc<Mutex<()>>;

pub struct Pipeline<S> {
    store: Arc<S>,
    tracking: SourceTrackingStore<S>,
    locks: Mutex<HashMap<(String, String), PairLock>>,
}

impl<S: RemoteStore> Pipeline<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            tracking: SourceTrackingStore::new(Arc::clone(&store)),
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn pair_lock(&self, country: &str, source: &str) -> PairLock {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry((country.to_string(), source.to_string()))
                .or_default(),
        )
    }

    /// Push one scraper document through dedup, transform, write and
    /// tracking.
    ///
    /// # Errors
    ///
    /// Only a failed tracking read fails the batch. Individual write
    /// failures and a failed tracking write are counted in the report.
    #[instrument(level = "info", skip(self, document), fields(received = document.articles.len()))]
    pub async fn ingest(
        &self,
        country: &str,
        source: &str,
        document: &ScraperDocument,
        force: bool,
    ) -> Result<IngestReport> {
        let country = country.trim().to_lowercase();
        let source = source.trim().to_lowercase();
        let lock = self.pair_lock(&country, &source).await;
        let _guard = lock.lock().await;

        let mut report = IngestReport {
            country: country.clone(),
            source: source.clone(),
            received: document.articles.len(),
            ..Default::default()
        };

        let previous = self.tracking.get(&country, &source).await?;
        let threshold = previous
            .as_ref()
            .filter(|_| !force)
            .map(|t| t.latest_published_unix);
        report.latest_published_unix = previous.as_ref().map(|t| t.latest_published_unix);

        let now = Utc::now();
        let mut candidates = Vec::new();
        for (key, value) in document.entries_in_order() {
            let Some(raw) = parse_entry(key, value) else {
                report.malformed += 1;
                continue;
            };
            let published = raw.published_unix();
            if threshold.is_some_and(|t| published <= t) {
                debug!(key, published, "Already tracked; skipping");
                report.already_tracked += 1;
                continue;
            }
            let title = raw.title.as_deref().unwrap_or_default();
            let url = raw.url.as_deref().unwrap_or_default();
            candidates.push(Candidate {
                id: article_id(title, url, &source),
                record: transform(&raw, &source, now),
            });
        }
        candidates.sort_by_key(|c| c.record.published_unix());

        let mut newest_written: Option<&Candidate> = None;
        for candidate in &candidates {
            let path = article_path(&country, &candidate.id);
            let written = match serde_json::to_value(&candidate.record) {
                Ok(body) => self.store.set(&path, &body).await,
                Err(e) => Err(e.into()),
            };
            match written {
                Ok(()) => {
                    debug!(%path, "Article written");
                    report.written += 1;
                    newest_written = Some(candidate);
                }
                Err(e) => {
                    error!(%path, error = %e, "Failed to write article");
                    report.failed += 1;
                }
            }
        }

        if let Some(newest) = newest_written {
            let next = SourceTracking {
                latest_article_id: newest.id.clone(),
                latest_published_date: newest.record.metadata.date_published.clone(),
                latest_published_unix: newest.record.published_unix(),
            };
            match self.tracking.update(&country, &source, &next).await {
                Ok(()) => {
                    report.tracking_updated = true;
                    report.latest_published_unix = Some(next.latest_published_unix);
                }
                Err(e) => error!(error = %e, "Failed to update source tracking"),
            }
        }

        if report.written == 0 && report.failed == 0 {
            info!(
                already_tracked = report.already_tracked,
                malformed = report.malformed,
                "No new articles"
            );
        } else {
            info!(
                written = report.written,
                failed = report.failed,
                already_tracked = report.already_tracked,
                malformed = report.malformed,
                tracking_updated = report.tracking_updated,
                "Batch ingested"
            );
        }
        Ok(report)
    }
}

/// Parse one document entry, rejecting non-objects and entries without a
/// title or url.
fn parse_entry(key: &str, value: &serde_json::Value) -> Option<RawArticle> {
    if !value.is_object() {
        warn!(key, "Entry is not an object; skipping");
        return None;
    }
    let raw = match serde_json::from_value::<RawArticle>(value.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, error = %e, "Unparseable entry; skipping");
            return None;
        }
    };
    let has = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !has(&raw.title) || !has(&raw.url) {
        warn!(key, "Entry lacks a title or url; skipping");
        return None;
    }
    Some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::{Value, json};

    fn doc(entries: Vec<Value>) -> ScraperDocument {
        ScraperDocument {
            articles: entries
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
        }
    }

    fn raw(title: &str, ts: i64) -> Value {
        json!({
            "title": title,
            "url": format!("https://ocote.example/{title}"),
            "text": "body",
            "unix_date_published": ts,
            "organization_country": "Guatemala"
        })
    }

    fn id_of(title: &str) -> String {
        article_id(title, &format!("https://ocote.example/{title}"), "ocote")
    }

    async fn seeded(latest: i64) -> (Arc<MemoryStore>, Pipeline<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "sourceTracking/guatemala/ocote",
                &json!({
                    "latestArticleId": "X",
                    "latestPublishedDate": "1970-01-01",
                    "latestPublishedUnix": latest
                }),
            )
            .await
            .unwrap();
        let pipeline = Pipeline::new(Arc::clone(&store));
        (store, pipeline)
    }

    async fn tracking(store: &MemoryStore) -> SourceTracking {
        let value = store
            .get("sourceTracking/guatemala/ocote")
            .await
            .unwrap()
            .unwrap();
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_article_id_is_deterministic() {
        let a = article_id("Title", "https://x.example/1", "ocote");
        assert_eq!(a, article_id("Title", "https://x.example/1", "ocote"));
        assert_ne!(a, article_id("Title", "https://x.example/1", "boom"));
        assert_eq!(a.len(), 36);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_transform_fills_defaults() {
        let raw: RawArticle = serde_json::from_value(json!({
            "title": "Claim",
            "url": "https://ocote.example/claim",
            "unix_date_published": 1736899200,
            "organization_country": " Guatemala "
        }))
        .unwrap();
        let now = DateTime::from_timestamp(1_736_985_600, 0).unwrap();

        let record = transform(&raw, "Ocote", now);
        assert_eq!(record.metadata.source, "ocote");
        assert_eq!(record.metadata.language, "es");
        assert_eq!(record.metadata.date_published, "2025-01-15");
        assert_eq!(record.metadata.date_added, "2025-01-16");
        assert_eq!(record.metadata.date_added_unix, 1_736_985_600);
        assert_eq!(record.content.hyper_links, vec!["https://ocote.example/claim"]);
        assert_eq!(record.content.locations, vec!["guatemala"]);
        assert_eq!(record.metadata.author, "");
        assert!(record.id.is_none());
    }

    #[test]
    fn test_transform_lowercases_language_and_omits_missing_country() {
        let raw: RawArticle = serde_json::from_value(json!({
            "title": "Claim",
            "url": "https://x.example",
            "language": "EN"
        }))
        .unwrap();
        let record = transform(&raw, "checkyourfact", Utc::now());
        assert_eq!(record.metadata.language, "en");
        assert!(record.content.locations.is_empty());
        assert_eq!(record.metadata.date_published, "1970-01-01");
    }

    #[tokio::test]
    async fn test_older_article_is_skipped() {
        let (store, pipeline) = seeded(500).await;
        let before = store.writes();

        let report = pipeline
            .ingest("guatemala", "ocote", &doc(vec![raw("old", 400)]), false)
            .await
            .unwrap();

        assert_eq!(report.written, 0);
        assert_eq!(report.already_tracked, 1);
        assert!(!report.tracking_updated);
        assert_eq!(report.latest_published_unix, Some(500));
        assert_eq!(store.writes(), before);
        assert_eq!(tracking(&store).await.latest_article_id, "X");
    }

    #[tokio::test]
    async fn test_newer_article_is_written_and_tracked() {
        let (store, pipeline) = seeded(500).await;

        let report = pipeline
            .ingest("Guatemala", "OCOTE", &doc(vec![raw("new", 600)]), false)
            .await
            .unwrap();

        assert_eq!(report.written, 1);
        assert!(report.tracking_updated);
        let id = id_of("new");
        let stored = store
            .get(&format!("articles/guatemala/{id}"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["metadata"]["title"], "new");
        assert!(stored.get("id").is_none());

        let t = tracking(&store).await;
        assert_eq!(t.latest_article_id, id);
        assert_eq!(t.latest_published_unix, 600);
    }

    #[tokio::test]
    async fn test_equal_timestamp_counts_as_tracked() {
        let (_store, pipeline) = seeded(500).await;
        let report = pipeline
            .ingest("guatemala", "ocote", &doc(vec![raw("same", 500)]), false)
            .await
            .unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(report.already_tracked, 1);
    }

    #[tokio::test]
    async fn test_second_identical_run_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(Arc::clone(&store));
        let batch = doc(vec![raw("a", 100), raw("b", 200), raw("c", 300)]);

        let first = pipeline.ingest("guatemala", "ocote", &batch, false).await.unwrap();
        assert_eq!(first.written, 3);
        assert_eq!(first.latest_published_unix, Some(300));
        let writes = store.writes();

        let second = pipeline.ingest("guatemala", "ocote", &batch, false).await.unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.already_tracked, 3);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_tracking_points_at_newest_regardless_of_input_order() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(Arc::clone(&store));
        let batch = doc(vec![raw("mid", 200), raw("newest", 300), raw("oldest", 100)]);

        pipeline.ingest("guatemala", "ocote", &batch, false).await.unwrap();
        let t = tracking(&store).await;
        assert_eq!(t.latest_article_id, id_of("newest"));
        assert_eq!(t.latest_published_unix, 300);

        let later = doc(vec![raw("late arrival", 250)]);
        let report = pipeline.ingest("guatemala", "ocote", &later, false).await.unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(tracking(&store).await.latest_published_unix, 300);
    }

    #[tokio::test]
    async fn test_force_rewrites_and_may_move_tracking_back() {
        let (store, pipeline) = seeded(500).await;
        let batch = doc(vec![raw("a", 100), raw("b", 200)]);

        let report = pipeline.ingest("guatemala", "ocote", &batch, true).await.unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.already_tracked, 0);
        assert_eq!(tracking(&store).await.latest_published_unix, 200);
    }

    #[tokio::test]
    async fn test_malformed_entries_are_counted_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(Arc::clone(&store));
        let batch = doc(vec![
            raw("good", 100),
            json!({ "title": "no url" }),
            json!({ "url": "https://x.example", "title": "   " }),
            json!("not an object"),
            json!({ "title": "bad types", "url": ["x"] }),
        ]);

        let report = pipeline.ingest("guatemala", "ocote", &batch, false).await.unwrap();
        assert_eq!(report.received, 5);
        assert_eq!(report.malformed, 4);
        assert_eq!(report.written, 1);
    }

    #[tokio::test]
    async fn test_tracking_stops_at_last_successful_write() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(Arc::clone(&store));
        store.fail_writes_under(&format!("articles/guatemala/{}", id_of("newest")));

        let batch = doc(vec![raw("older", 100), raw("newest", 200)]);
        let report = pipeline.ingest("guatemala", "ocote", &batch, false).await.unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        let t = tracking(&store).await;
        assert_eq!(t.latest_article_id, id_of("older"));
        assert_eq!(t.latest_published_unix, 100);

        store.clear_failures();
        let retry = pipeline.ingest("guatemala", "ocote", &batch, false).await.unwrap();
        assert_eq!(retry.written, 1);
        assert_eq!(retry.already_tracked, 1);
    }

    #[tokio::test]
    async fn test_all_writes_failing_leaves_tracking_alone() {
        let (store, pipeline) = seeded(500).await;
        store.fail_writes_under("articles/guatemala");

        let report = pipeline
            .ingest("guatemala", "ocote", &doc(vec![raw("a", 600), raw("b", 700)]), false)
            .await
            .unwrap();

        assert_eq!(report.written, 0);
        assert_eq!(report.failed, 2);
        assert!(!report.tracking_updated);
        assert_eq!(tracking(&store).await.latest_published_unix, 500);
    }

    #[tokio::test]
    async fn test_tracking_read_failure_fails_batch() {
        let store = Arc::new(MemoryStore::new());
        store.fail_reads_under("sourceTracking/guatemala");
        let pipeline = Pipeline::new(Arc::clone(&store));

        let result = pipeline
            .ingest("guatemala", "ocote", &doc(vec![raw("a", 1)]), false)
            .await;
        assert!(result.is_err());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_tracking_write_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.fail_writes_under("sourceTracking");
        let pipeline = Pipeline::new(Arc::clone(&store));

        let report = pipeline
            .ingest("guatemala", "ocote", &doc(vec![raw("a", 1)]), false)
            .await
            .unwrap();
        assert_eq!(report.written, 1);
        assert!(!report.tracking_updated);
        assert_eq!(report.latest_published_unix, None);
    }

    #[tokio::test]
    async fn test_concurrent_batches_for_one_pair_do_not_double_write() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(Arc::clone(&store));
        let batch = doc(vec![raw("a", 100), raw("b", 200)]);

        let (first, second) = tokio::join!(
            pipeline.ingest("guatemala", "ocote", &batch, false),
            pipeline.ingest("guatemala", "ocote", &batch, false),
        );
        let written = first.unwrap().written + second.unwrap().written;
        assert_eq!(written, 2);
    }

    #[tokio::test]
    async fn test_null_timestamp_sorts_first() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(Arc::clone(&store));
        let undated = json!({ "title": "undated", "url": "https://ocote.example/undated" });

        pipeline
            .ingest("guatemala", "ocote", &doc(vec![raw("dated", 50), undated]), false)
            .await
            .unwrap();
        assert_eq!(tracking(&store).await.latest_article_id, id_of("dated"));
    }
}
