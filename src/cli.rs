//! Command-line interface definitions.
//!
//! Global options can be given as flags or environment variables and take
//! precedence over the YAML configuration file. Every subcommand prints its
//! result as JSON on stdout; logs go to stderr.

use crate::service::DEFAULT_LIMIT;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Fact-check article aggregator: ingest scraper output into the shared
/// store and serve recent articles per country through a local cache.
///
/// # Examples
///
/// ```sh
/// # Run every configured scraper and ingest the results
/// factcheck_map ingest --report-dir ./reports
///
/// # Serve the five most recent articles for a country
/// factcheck_map articles usa --limit 5
///
/// # Replace the whitelist, then refresh everything on it
/// factcheck_map whitelist set USA UK INDIA
/// factcheck_map refresh-all
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML configuration file
    #[arg(short, long, env = "FACTMAP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Firebase Realtime Database URL
    #[arg(long, env = "FIREBASE_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Database secret or ID token
    #[arg(long, env = "FIREBASE_AUTH", global = true, hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Cache file location
    #[arg(long, global = true)]
    pub cache_file: Option<PathBuf>,

    /// Directory containing one subdirectory per scraper
    #[arg(long, global = true)]
    pub scrapers_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run scrapers and ingest their output
    Ingest {
        /// Only these sources (repeatable); default is every configured source
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Ignore tracking and rewrite everything the scrapers return
        #[arg(long)]
        force: bool,

        /// Also write the run summary under this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// Ingest a scraper document that already exists on disk
    IngestFile {
        /// Source the document came from
        #[arg(short, long)]
        source: String,

        /// Path to the document
        file: PathBuf,

        #[arg(long)]
        force: bool,
    },

    /// Most recent articles for a country
    Articles {
        country: String,

        /// Maximum number of articles (1-100)
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Refresh the cache for the given countries
    Refresh {
        #[arg(required = true)]
        countries: Vec<String>,
    },

    /// Refresh the cache for every whitelisted country
    RefreshAll,

    /// Show or replace the country whitelist
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },

    /// Cache status snapshot
    Status,

    /// Drop every cached country (the whitelist is kept)
    Clear,

    /// Raw remote data for a country, or the whole database when omitted
    Dump { country: Option<String> },

    /// Configured sources and whether their scrapers are installed
    Sources,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum WhitelistAction {
    /// Replace the whitelist
    Set {
        #[arg(required = true)]
        countries: Vec<String>,
    },
    /// Print the whitelist
    Show,
}
