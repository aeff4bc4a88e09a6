//! JSON summaries of ingestion runs.
//!
//! # Output Structure
//!
//! Reports are grouped by the local date the run started, one file per run
//! named after its start time:
//! ```text
//! report_dir/
//! └── 2025-05-06/
//!     ├── 061500.json
//!     └── 181500.json
//! ```

use crate::error::Result;
use crate::models::IngestRun;
use crate::utils::ensure_writable_dir;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write an [`IngestRun`] to `{report_dir}/{YYYY-MM-DD}/{HHMMSS}.json`.
///
/// Returns the path written.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir.display()))]
pub async fn write_run_report(
    run: &IngestRun,
    report_dir: &Path,
    started: DateTime<Local>,
) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(run)?;

    let day_dir = report_dir.join(started.format("%Y-%m-%d").to_string());
    if let Err(e) = ensure_writable_dir(&day_dir).await {
        error!(dir = %day_dir.display(), error = %e, "Report directory is not writable");
        return Err(e);
    }

    let path = day_dir.join(format!("{}.json", started.format("%H%M%S")));
    fs::write(&path, json).await?;
    info!(
        path = %path.display(),
        sources = run.sources.len(),
        written = run.total_written(),
        "Wrote ingest run report"
    );
    Ok(path)
}
