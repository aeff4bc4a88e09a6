//! Remote key-path store and the reads built on top of it.
//!
//! The shared article database is addressed by slash-separated key paths:
//!
//! ```text
//! articles/{country}/{article id}      -> ArticleRecord
//! sourceTracking/{country}/{source}    -> SourceTracking
//! ```
//!
//! Country segments are always lowercase in the remote store, whatever case
//! the caller used.
//!
//! # Submodules
//!
//! - [`firebase`]: Firebase Realtime Database REST adapter
//! - [`retry`]: timeout + exponential backoff decorator for any [`RemoteStore`]
//! - `memory`: in-process store used by tests

use crate::error::Result;
use crate::models::ArticleRecord;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

pub mod firebase;
#[cfg(test)]
pub mod memory;
pub mod retry;

pub use firebase::FirebaseStore;
pub use retry::RetryStore;

/// Key-path read/write access to the shared store.
///
/// `get` returns `Ok(None)` for a path that holds nothing; that is not an
/// error. Writing replaces whatever was at the path.
pub trait RemoteStore {
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    async fn set(&self, path: &str, value: &Value) -> Result<()>;
}

pub fn country_articles_path(country: &str) -> String {
    format!("articles/{}", country.trim().to_lowercase())
}

pub fn article_path(country: &str, id: &str) -> String {
    format!("{}/{}", country_articles_path(country), id)
}

pub fn tracking_path(country: &str, source: &str) -> String {
    format!(
        "sourceTracking/{}/{}",
        country.trim().to_lowercase(),
        source.trim().to_lowercase()
    )
}

/// Fetch the `limit` most recent articles for `country`, newest first.
///
/// An absent country is zero articles, not an error.
#[instrument(level = "info", skip(store), fields(country = %country))]
pub async fn recent_articles<S: RemoteStore>(
    store: &S,
    country: &str,
    limit: usize,
) -> Result<Vec<ArticleRecord>> {
    let path = country_articles_path(country);
    let Some(tree) = store.get(&path).await? else {
        info!("No articles stored for country");
        return Ok(Vec::new());
    };

    let mut articles = collect_articles(&tree);
    articles.sort_by(|a, b| b.published_unix().cmp(&a.published_unix()));
    let found = articles.len();
    articles.truncate(limit);
    info!(found, returned = articles.len(), "Fetched recent articles");
    Ok(articles)
}

/// Flatten a country subtree into records.
///
/// Two layouts exist in the store: `{id: article}` as written by the pipeline,
/// and an older `{date: {id: article}}` grouping. A node is an article when it
/// is an object with a `metadata` member.
fn collect_articles(tree: &Value) -> Vec<ArticleRecord> {
    let mut articles = Vec::new();
    let Some(nodes) = tree.as_object() else {
        warn!("Country node is not an object; ignoring");
        return articles;
    };

    for (key, node) in nodes {
        if is_article(node) {
            push_article(&mut articles, key, node);
        } else if let Some(bucket) = node.as_object() {
            for (id, inner) in bucket {
                if is_article(inner) {
                    push_article(&mut articles, id, inner);
                } else {
                    debug!(bucket = %key, id = %id, "Skipping non-article node");
                }
            }
        } else {
            debug!(key = %key, "Skipping scalar node");
        }
    }
    articles
}

fn is_article(node: &Value) -> bool {
    node.as_object().is_some_and(|o| o.contains_key("metadata"))
}

fn push_article(out: &mut Vec<ArticleRecord>, id: &str, node: &Value) {
    match serde_json::from_value::<ArticleRecord>(node.clone()) {
        Ok(mut article) => {
            article.id = Some(id.to_string());
            out.push(article);
        }
        Err(e) => warn!(id = %id, error = %e, "Malformed article in store; skipping"),
    }
}
