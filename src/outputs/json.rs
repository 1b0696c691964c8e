//! JSON batch report file.

use crate::report::BatchReport;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Serialize `report` as pretty-printed JSON into `path`.
///
/// Missing parent directories are created.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_report(report: &BatchReport, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create report directory");
            return Err(e.into());
        }
    }

    fs::write(path, json).await?;
    info!(feeds = report.feeds.len(), "Wrote JSON report");
    Ok(())
}
