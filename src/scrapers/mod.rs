//! Running the external site scrapers and loading what they produce.
//!
//! Scrapers are separate programs, one directory per source:
//!
//! ```text
//! scrapers_dir/
//! ├── ocote/
//! │   ├── scraper.py
//! │   └── data.json        # written by the scraper on each run
//! └── boom/
//!     └── ...
//! ```
//!
//! Each run deletes any stale `data.json`, executes the configured command
//! inside the source directory under a wall-clock ceiling, and parses the
//! fresh `data.json` as a [`ScraperDocument`](crate::models::ScraperDocument).
//!
//! # Outcomes
//!
//! | Situation | Result |
//! |-----------|--------|
//! | Directory missing | `Ok(None)`, logged and skipped |
//! | Ceiling reached | [`Error::Timeout`](crate::error::Error::Timeout), child killed |
//! | Non-zero exit | [`Error::Scraper`](crate::error::Error::Scraper) with stderr tail |
//! | No `data.json` after exit | [`Error::Scraper`](crate::error::Error::Scraper) |
//! | Unparseable `data.json` | [`Error::Json`](crate::error::Error::Json) |

pub mod runner;

pub use runner::{ScraperRunner, read_document};
