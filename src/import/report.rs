use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::populate::PopulateReport;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReportFile<'a> {
    generated_at: String,
    database: String,
    run: &'a PopulateReport,
}

/// Write `populate-<timestamp>.json` into `reports_dir` and return its path.
pub fn write_run_report(reports_dir: &Path, database: &Path, report: &PopulateReport) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let timestamp = Utc::now().format("populate-%Y%m%d-%H%M%S.json");
    let path = reports_dir.join(timestamp.to_string());
    let payload = RunReportFile {
        generated_at: Utc::now().to_rfc3339(),
        database: database.display().to_string(),
        run: report,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize run report")?;
    fs::write(&path, json).with_context(|| format!("write run report {}", path.display()))?;
    Ok(path)
}
