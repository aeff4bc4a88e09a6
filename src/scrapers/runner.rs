use crate::config::{Config, is_valid_source_name};
use crate::error::{Error, Result};
use crate::models::ScraperDocument;
use crate::utils::truncate_for_log;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

const DATA_FILE: &str = "data.json";

#[derive(Debug, Clone)]
pub struct ScraperRunner {
    scrapers_dir: PathBuf,
    command: Vec<String>,
    timeout: Duration,
}

impl ScraperRunner {
    pub fn new(scrapers_dir: impl Into<PathBuf>, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            scrapers_dir: scrapers_dir.into(),
            command,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.scrapers_dir,
            config.scraper_command.clone(),
            config.scraper_timeout(),
        )
    }

    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.scrapers_dir.join(source)
    }

    /// Whether a directory exists for `source`.
    pub async fn is_installed(&self, source: &str) -> bool {
        fs::metadata(self.source_dir(source))
            .await
            .is_ok_and(|m| m.is_dir())
    }

    /// Run the scraper for `source` and load its output.
    ///
    /// Returns `Ok(None)` when the source has no scraper directory.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self, source: &str) -> Result<Option<ScraperDocument>> {
        if !is_valid_source_name(source) {
            return Err(Error::Scraper(format!("invalid source name: {source:?}")));
        }
        let Some((program, args)) = self.command.split_first() else {
            return Err(Error::Config("scraper_command must not be empty".to_string()));
        };

        let dir = self.source_dir(source);
        if !self.is_installed(source).await {
            warn!(dir = %dir.display(), "Scraper directory not found; skipping");
            return Ok(None);
        }

        let data_path = dir.join(DATA_FILE);
        match fs::remove_file(&data_path).await {
            Ok(()) => info!("Removed stale data file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let t0 = Instant::now();
        let child = Command::new(program)
            .args(args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Scraper(format!("failed to start {program} for {source}: {e}")))?;
        info!(pid = ?child.id(), "Scraper started");

        // Dropping the pending wait on expiry drops the child, which kills it.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                error!(secs = self.timeout.as_secs(), "Scraper timed out; killed");
                return Err(Error::Timeout {
                    what: format!("scraper {source}"),
                    secs: self.timeout.as_secs(),
                });
            }
        };
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = %output.status, elapsed_ms, "Scraper failed");
            return Err(Error::Scraper(format!(
                "{source} exited with {}: {}",
                output.status,
                truncate_for_log(stderr.trim(), 500)
            )));
        }

        if !fs::try_exists(&data_path).await? {
            return Err(Error::Scraper(format!(
                "{source} exited without writing {DATA_FILE}"
            )));
        }
        let document = read_document(&data_path).await?;
        info!(
            elapsed_ms,
            articles = document.articles.len(),
            "Scraper finished"
        );
        Ok(Some(document))
    }
}

/// Parse a scraper document from disk.
pub async fn read_document(path: &Path) -> Result<ScraperDocument> {
    let bytes = fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
