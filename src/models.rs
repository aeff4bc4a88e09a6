//! Data models for fact-check articles and the reports built around them.
//!
//! This module defines the core data structures used throughout the application:
//! - [`ArticleRecord`]: the canonical article shape stored remotely and cached locally
//! - [`RawArticle`] / [`ScraperDocument`]: what a scraper hands to the pipeline
//! - [`SourceTracking`]: the per (country, source) "latest ingested" bookmark
//! - Report types returned by the service: [`ArticlesResponse`], [`RefreshReport`],
//!   [`CacheStatus`], [`WhitelistUpdate`], [`IngestReport`], [`IngestRun`]
//!
//! Stored and served documents use camelCase field names to stay compatible
//! with the records already present in the remote store. Scraper output keeps
//! the scrapers' own snake_case names.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A fact-check article in its canonical, stored form.
///
/// Every section defaults when missing so that older or partial records read
/// back from the remote store still deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleRecord {
    /// The remote-store key this record was read from. Never written into the
    /// stored body; the key already carries it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub metadata: ArticleMetadata,
    pub content: ArticleContent,
    pub fact_check: FactCheck,
    pub media: Media,
}

impl ArticleRecord {
    /// Publication time as Unix seconds; the sort key everywhere.
    pub fn published_unix(&self) -> i64 {
        self.metadata.date_published_unix
    }
}

/// Descriptive fields of an article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleMetadata {
    pub title: String,
    /// Lowercase source (scraper) name, e.g. `"ocote"`.
    pub source: String,
    /// Publication date as `YYYY-MM-DD` (UTC).
    pub date_published: String,
    #[serde(deserialize_with = "deserialize_epoch")]
    pub date_published_unix: i64,
    /// Ingestion date as `YYYY-MM-DD` (UTC).
    pub date_added: String,
    #[serde(deserialize_with = "deserialize_epoch")]
    pub date_added_unix: i64,
    pub url: String,
    pub language: String,
    pub author: String,
}

/// Body text and tag lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleContent {
    pub article_text: String,
    pub categories: Vec<String>,
    pub hyper_links: Vec<String>,
    pub issues: Vec<String>,
    pub locations: Vec<String>,
    pub people: Vec<String>,
}

/// The verdict, when the source publishes one. Both fields are often empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FactCheck {
    pub determination: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Media {
    pub caption: String,
    pub image_url: String,
}

/// One article as produced by a scraper.
///
/// Scrapers are written independently and disagree on which fields they fill
/// in, so everything is optional here. The pipeline decides what is required.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RawArticle {
    pub title: Option<String>,
    pub text: Option<String>,
    pub author: Option<String>,
    pub date_published: Option<String>,
    /// Integer, float or null in the wild; null means "oldest possible".
    #[serde(deserialize_with = "deserialize_optional_epoch")]
    pub unix_date_published: Option<i64>,
    pub organization_country: Option<String>,
    pub site_name: Option<String>,
    pub url: Option<String>,
    pub language: Option<String>,
}

impl RawArticle {
    /// Publication time, with a missing value treated as epoch 0.
    pub fn published_unix(&self) -> i64 {
        self.unix_date_published.unwrap_or(0)
    }
}

/// The `data.json` document a scraper writes.
///
/// The keys of `articles` are insertion indexes (`"0"`, `"1"`, ...), not
/// identifiers. Entries are kept as raw JSON so that one malformed entry can
/// be skipped without rejecting the whole document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperDocument {
    pub articles: BTreeMap<String, Value>,
}

impl ScraperDocument {
    /// Entries in scraper order: numeric keys ascending, then any
    /// non-numeric keys in lexical order.
    pub fn entries_in_order(&self) -> Vec<(&str, &Value)> {
        let mut entries: Vec<(&str, &Value)> = self
            .articles
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        entries.sort_by_key(|(k, _)| match k.parse::<u64>() {
            Ok(n) => (0, n, String::new()),
            Err(_) => (1, 0, k.to_string()),
        });
        entries
    }
}

/// Bookmark of the most recently ingested article for one (country, source).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceTracking {
    pub latest_article_id: String,
    pub latest_published_date: String,
    #[serde(deserialize_with = "deserialize_epoch")]
    pub latest_published_unix: i64,
}

/// Where a set of served articles came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleSource {
    Cache,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticlesResponse {
    pub country: String,
    pub count: usize,
    pub limit: usize,
    pub source: ArticleSource,
    pub articles: Vec<ArticleRecord>,
}

/// Outcome of refreshing a single country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CountryRefresh {
    Success {
        #[serde(rename = "articleCount")]
        article_count: usize,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub results: BTreeMap<String, CountryRefresh>,
    /// Requested countries that are not whitelisted and were left alone.
    pub skipped: Vec<String>,
}

impl RefreshReport {
    pub fn succeeded(&self) -> usize {
        self.results
            .values()
            .filter(|r| matches!(r, CountryRefresh::Success { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn total_articles(&self) -> usize {
        self.results
            .values()
            .map(|r| match r {
                CountryRefresh::Success { article_count } => *article_count,
                CountryRefresh::Error { .. } => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTime {
    pub timestamp: f64,
    /// Local time as `YYYY-MM-DD HH:MM:SS`.
    pub formatted: String,
}

/// Read-only snapshot of the cache for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub cached_countries: Vec<String>,
    pub whitelisted_countries: Vec<String>,
    pub total_articles: usize,
    pub articles_per_country: BTreeMap<String, usize>,
    /// `"cached/whitelisted"`, e.g. `"3/5"`.
    pub cache_coverage: String,
    pub coverage_ratio: f64,
    pub last_refresh_time: BTreeMap<String, RefreshTime>,
}

/// Diff produced by replacing the whitelist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistUpdate {
    pub whitelisted_countries: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Result of pushing one scraper batch through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub country: String,
    pub source: String,
    /// Entries in the scraper document.
    pub received: usize,
    /// Entries skipped for being unparseable or missing title/url.
    pub malformed: usize,
    /// Entries at or before the tracked timestamp.
    pub already_tracked: usize,
    pub written: usize,
    pub failed: usize,
    pub tracking_updated: bool,
    /// Tracked timestamp after the run, if any.
    pub latest_published_unix: Option<i64>,
}

/// Per-source line in an ingestion run summary.
///
/// Exactly one of `report` and `error` is set, unless the source was
/// `skipped` because no scraper is installed for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRun {
    pub source: String,
    pub country: String,
    #[serde(default)]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IngestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one `ingest` invocation across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRun {
    pub started_at: String,
    pub finished_at: String,
    pub sources: Vec<SourceRun>,
}

impl IngestRun {
    pub fn total_written(&self) -> usize {
        self.sources
            .iter()
            .filter_map(|s| s.report.as_ref())
            .map(|r| r.written)
            .sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn skipped_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.skipped).count()
    }
}

/// Accept an epoch given as integer, float, numeric string or null (→ 0).
fn deserialize_epoch<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_optional_epoch(deserializer)?.unwrap_or(0))
}

fn deserialize_optional_epoch<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_article_record_uses_camel_case() {
        let mut article = ArticleRecord::default();
        article.metadata.date_published_unix = 42;
        article.content.hyper_links = vec!["https://example.com".to_string()];

        let json = serde_json::to_value(&article).unwrap();
        assert_eq!(json["metadata"]["datePublishedUnix"], 42);
        assert_eq!(json["content"]["hyperLinks"][0], "https://example.com");
        assert!(json.get("factCheck").is_some());
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_partial_record_deserializes_with_defaults() {
        let article: ArticleRecord = serde_json::from_value(json!({
            "metadata": { "title": "Only a title", "datePublishedUnix": 1700000000.7 }
        }))
        .unwrap();

        assert_eq!(article.metadata.title, "Only a title");
        assert_eq!(article.published_unix(), 1700000000);
        assert!(article.content.categories.is_empty());
        assert_eq!(article.fact_check, FactCheck::default());
    }

    #[test]
    fn test_raw_article_epoch_variants() {
        let int: RawArticle = serde_json::from_value(json!({ "unix_date_published": 600 })).unwrap();
        let float: RawArticle =
            serde_json::from_value(json!({ "unix_date_published": 1712345678.0 })).unwrap();
        let null: RawArticle = serde_json::from_value(json!({ "unix_date_published": null })).unwrap();
        let missing: RawArticle = serde_json::from_value(json!({ "title": "x" })).unwrap();

        assert_eq!(int.published_unix(), 600);
        assert_eq!(float.published_unix(), 1712345678);
        assert_eq!(null.published_unix(), 0);
        assert_eq!(missing.published_unix(), 0);
    }

    #[test]
    fn test_raw_article_tolerates_null_strings() {
        let raw: RawArticle = serde_json::from_value(json!({
            "title": "T",
            "author": null,
            "url": "https://example.com/a"
        }))
        .unwrap();
        assert_eq!(raw.title.as_deref(), Some("T"));
        assert!(raw.author.is_none());
    }

    #[test]
    fn test_scraper_document_orders_numerically() {
        let doc: ScraperDocument = serde_json::from_value(json!({
            "articles": {
                "10": { "title": "ten" },
                "2": { "title": "two" },
                "0": { "title": "zero" },
                "extra": { "title": "extra" }
            }
        }))
        .unwrap();

        let keys: Vec<&str> = doc.entries_in_order().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["0", "2", "10", "extra"]);
    }

    #[test]
    fn test_country_refresh_shape() {
        let ok = serde_json::to_value(CountryRefresh::Success { article_count: 7 }).unwrap();
        assert_eq!(ok, json!({ "status": "success", "articleCount": 7 }));

        let err = serde_json::to_value(CountryRefresh::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(err, json!({ "status": "error", "message": "boom" }));
    }

    #[test]
    fn test_refresh_report_counters() {
        let mut report = RefreshReport::default();
        report
            .results
            .insert("USA".to_string(), CountryRefresh::Success { article_count: 10 });
        report
            .results
            .insert("UK".to_string(), CountryRefresh::Success { article_count: 3 });
        report.results.insert(
            "INDIA".to_string(),
            CountryRefresh::Error {
                message: "timeout".to_string(),
            },
        );

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.total_articles(), 13);
    }

    #[test]
    fn test_source_tracking_reads_float_epoch() {
        let tracking: SourceTracking = serde_json::from_value(json!({
            "latestArticleId": "abc",
            "latestPublishedDate": "2025-01-01",
            "latestPublishedUnix": 500.0
        }))
        .unwrap();
        assert_eq!(tracking.latest_published_unix, 500);
    }
}
