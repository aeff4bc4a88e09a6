//! Firebase Realtime Database over its REST interface.
//!
//! Every key path maps to a `.json` resource under the database URL:
//!
//! ```text
//! get("articles/usa")        -> GET {base}/articles/usa.json
//! set("articles/usa/abc", v) -> PUT {base}/articles/usa/abc.json   (body: v)
//! ```
//!
//! A `null` body means nothing is stored at the path.

use super::RemoteStore;
use crate::error::{Error, Result};
use crate::utils::truncate_for_log;
use reqwest::{Client, Response};
use serde_json::Value;
use std::fmt;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

pub struct FirebaseStore {
    client: Client,
    base: Url,
    auth: Option<String>,
}

impl fmt::Debug for FirebaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseStore")
            .field("base", &self.base.as_str())
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl FirebaseStore {
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] unless `database_url` is an absolute
    /// http(s) URL.
    pub fn new(database_url: &str, auth: Option<String>) -> Result<Self> {
        let base = Url::parse(database_url.trim())
            .map_err(|e| Error::InvalidUrl(format!("{database_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "{database_url}: expected http or https"
            )));
        }
        Ok(Self {
            client: Client::new(),
            base,
            auth: auth.filter(|a| !a.is_empty()),
        })
    }

    /// REST resource for a key path; every segment is percent-encoded.
    fn endpoint(&self, path: &str) -> Result<Url> {
        let encoded = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let raw = format!(
            "{}/{}.json",
            self.base.as_str().trim_end_matches('/'),
            encoded
        );
        let mut url = Url::parse(&raw).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
        if let Some(token) = &self.auth {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    async fn check(path: &str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(%path, status = status.as_u16(), "Remote store rejected request");
        Err(Error::Remote {
            path: path.to_string(),
            status: status.as_u16(),
            body: truncate_for_log(&body, 300),
        })
    }
}

impl RemoteStore for FirebaseStore {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let t0 = Instant::now();
        let resp = self.client.get(self.endpoint(path)?).send().await?;
        let value: Value = Self::check(path, resp).await?.json().await?;
        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "GET complete");
        Ok((!value.is_null()).then_some(value))
    }

    #[instrument(level = "debug", skip(self, value))]
    async fn set(&self, path: &str, value: &Value) -> Result<()> {
        let t0 = Instant::now();
        let resp = self
            .client
            .put(self.endpoint(path)?)
            .json(value)
            .send()
            .await?;
        Self::check(path, resp).await?;
        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "PUT complete");
        Ok(())
    }
}
