//! Report emission.
//!
//! The three matrix tables plus the failure report are written as
//! pretty-printed JSON arrays of flat rows, named after the organization
//! and run timestamp. Decimal fields serialize as strings, so the files
//! carry full weight precision.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;

use govscope_core::MatrixReport;

use crate::collector::FetchFailure;

pub struct ReportPaths {
    pub vote_log: PathBuf,
    pub delegate_summary: PathBuf,
    pub proposal_summary: PathBuf,
    pub failures: PathBuf,
}

impl ReportPaths {
    pub fn all(&self) -> [&Path; 4] {
        [
            &self.vote_log,
            &self.delegate_summary,
            &self.proposal_summary,
            &self.failures,
        ]
    }
}

pub fn write_reports(
    dir: &Path,
    slug: &str,
    report: &MatrixReport,
    failures: &[FetchFailure],
) -> anyhow::Result<ReportPaths> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let file = |table: &str| dir.join(format!("{}_{}_{}.json", slug, table, timestamp));

    let paths = ReportPaths {
        vote_log: file("vote_log"),
        delegate_summary: file("delegate_summary"),
        proposal_summary: file("proposal_summary"),
        failures: file("failures"),
    };

    write_json(&paths.vote_log, &report.vote_log)?;
    write_json(&paths.delegate_summary, &report.delegate_summaries)?;
    write_json(&paths.proposal_summary, &report.proposal_summaries)?;
    write_json(&paths.failures, &failures)?;

    tracing::info!(
        dir = %dir.display(),
        vote_rows = %report.vote_log.len(),
        delegates = %report.delegate_summaries.len(),
        proposals = %report.proposal_summaries.len(),
        failures = %failures.len(),
        "reports written"
    );

    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
