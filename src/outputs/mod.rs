//! Files written as a side effect of a run.
//!
//! # Submodules
//!
//! - [`json`]: writes ingestion run summaries to dated JSON files

pub mod json;
