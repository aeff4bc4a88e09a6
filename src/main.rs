//! # factcheck_map
//!
//! Aggregates fact-checking articles scraped from many independent sources,
//! stores them in a shared remote database keyed by country, and serves
//! recent articles per country from a local, whitelist-gated cache.
//!
//! ## Usage
//!
//! ```sh
//! factcheck_map ingest --report-dir ./reports
//! factcheck_map articles usa --limit 5
//! ```
//!
//! ## Architecture
//!
//! 1. **Scraping**: each source's scraper runs as a subprocess and leaves a
//!    `data.json` behind
//! 2. **Ingestion**: new articles (per the source's tracking bookmark) are
//!    transformed and written to `articles/{country}/{id}` (4 sources at a time)
//! 3. **Refresh**: the newest articles of each whitelisted country are pulled
//!    into the local cache file
//! 4. **Serving**: small requests are answered from the cache, the rest from
//!    the remote store

use chrono::Local;
use clap::Parser;
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cache;
mod cli;
mod config;
mod error;
mod ingest;
mod models;
mod outputs;
mod pipeline;
mod refresh;
mod scrapers;
mod service;
mod store;
mod tracking;
mod utils;

use cache::ArticleCache;
use cli::{Cli, Command, WhitelistAction};
use config::{Config, Overrides};
use ingest::IngestDriver;
use outputs::json;
use scrapers::ScraperRunner;
use service::ArticleService;
use store::{FirebaseStore, RetryStore};

type Remote = RetryStore<FirebaseStore>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceInfo<'a> {
    source: &'a str,
    country: &'a str,
    installed: bool,
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(command = ?args.command, config = ?args.config, "Parsed CLI arguments");

    let config = Config::load(args.config.as_deref())?.apply_overrides(Overrides {
        database_url: args.database_url,
        auth_token: args.auth_token,
        cache_file: args.cache_file,
        scrapers_dir: args.scrapers_dir,
    });

    match args.command {
        Command::Sources => {
            let runner = ScraperRunner::from_config(&config);
            let mut listing = Vec::with_capacity(config.sources.len());
            for (source, country) in &config.sources {
                listing.push(SourceInfo {
                    source,
                    country,
                    installed: runner.is_installed(source).await,
                });
            }
            print_json(&listing)?;
        }

        Command::Ingest {
            sources,
            force,
            report_dir,
        } => {
            let driver = IngestDriver::from_config(&config, remote_store(&config)?);
            let started = Local::now();
            let run = driver.run(&sources, force).await;
            if let Some(dir) = report_dir {
                json::write_run_report(&run, &dir, started).await?;
            }
            print_json(&run)?;
        }

        Command::IngestFile {
            source,
            file,
            force,
        } => {
            let driver = IngestDriver::from_config(&config, remote_store(&config)?);
            print_json(&driver.ingest_file(&source, &file, force).await?)?;
        }

        Command::Articles { country, limit } => {
            let service = open_service(&config).await?;
            print_json(&service.get_articles(&country, limit).await?)?;
        }

        Command::Refresh { countries } => {
            let service = open_service(&config).await?;
            print_json(&service.refresh(countries).await)?;
        }

        Command::RefreshAll => {
            let service = open_service(&config).await?;
            print_json(&service.refresh_all().await)?;
        }

        Command::Whitelist { action } => {
            let service = open_service(&config).await?;
            match action {
                WhitelistAction::Set { countries } => {
                    print_json(&service.set_whitelist(countries).await?)?
                }
                WhitelistAction::Show => print_json(&service.whitelist().await)?,
            }
        }

        Command::Status => {
            let service = open_service(&config).await?;
            print_json(&service.cache_status().await)?;
        }

        Command::Clear => {
            let service = open_service(&config).await?;
            service.clear_cache().await?;
            print_json(&service.cache_status().await)?;
        }

        Command::Dump { country } => {
            let service = open_service(&config).await?;
            let raw = match country {
                Some(country) => service.all_articles(&country).await?,
                None => service.all_data().await?,
            };
            print_json(&raw)?;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

fn remote_store(config: &Config) -> error::Result<Arc<Remote>> {
    let url = config.database_url.as_deref().ok_or_else(|| {
        error::Error::Config(
            "database_url is not set (use --database-url or FIREBASE_DATABASE_URL)".to_string(),
        )
    })?;
    let firebase = FirebaseStore::new(url, config.auth_token.clone())?;
    info!(store = ?firebase, "Remote store configured");
    Ok(Arc::new(RetryStore::new(
        firebase,
        config.remote_retries,
        config.remote_retry_base(),
        config.remote_timeout(),
    )))
}

async fn open_service(config: &Config) -> error::Result<ArticleService<Remote>> {
    let cache = Arc::new(ArticleCache::open(&config.cache_file).await);
    let service = ArticleService::new(remote_store(config)?, cache, config.cache_retention);
    service.ensure_default_whitelist(&config.default_whitelist).await?;
    Ok(service)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
