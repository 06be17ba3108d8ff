use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::gaps::Gap;
use crate::ledger::BatchLedger;
use crate::merge::MergeStats;
use crate::types::{Record, UnitStatus};

/// Per-pass counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassSummary {
    pub units: usize,
    pub succeeded: usize,
    pub zero_yield: usize,
    pub errored: usize,
    pub records: usize,
}

impl PassSummary {
    pub fn from_ledger(ledger: &BatchLedger) -> Self {
        Self {
            units: ledger.len(),
            succeeded: ledger.count_status(UnitStatus::Success),
            zero_yield: ledger.count_status(UnitStatus::ZeroYield),
            errored: ledger.count_status(UnitStatus::Errored),
            records: ledger.total_records(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub cancelled: bool,
    pub main: PassSummary,
    /// Absent when no recovery pass ran
    pub recovery: Option<PassSummary>,
    /// Gaps found after the main pass
    pub gaps: Vec<Gap>,
    pub stats: MergeStats,
}

impl RunReport {
    pub fn log_summary(&self) {
        info!("📋 Run finished in {:.1}s", self.duration_secs);
        info!(
            "Main pass: {} units | {} ok | {} zero-yield | {} errored | {} records",
            self.main.units, self.main.succeeded, self.main.zero_yield, self.main.errored, self.main.records
        );
        if let Some(recovery) = &self.recovery {
            info!("Recovery pass: {} units | {} recovered | {} records", recovery.units, recovery.succeeded, recovery.records);
        }
        info!(
            "Final: {} of {} records ({:.2}%), {} duplicates removed, {} failed units",
            self.stats.actual,
            self.stats.expected,
            self.stats.completeness_percent,
            self.stats.duplicates_removed,
            self.stats.failed_units.len()
        );
    }
}

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub records: PathBuf,
    pub report: PathBuf,
}

/// Write records as JSON Lines and the report as pretty JSON, both stamped with the run's start time
pub async fn write_outputs(dir: &Path, prefix: &str, records: &[Record], report: &RunReport) -> Result<OutputPaths> {
    tokio::fs::create_dir_all(dir).await.with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let stamp = report.started_at.format("%Y%m%d_%H%M%S");
    let paths = OutputPaths { records: dir.join(format!("{}_{}.jsonl", prefix, stamp)), report: dir.join(format!("{}_{}_report.json", prefix, stamp)) };

    let mut lines = String::new();
    for record in records {
        lines.push_str(&serde_json::to_string(record).context("Failed to serialize record")?);
        lines.push('\n');
    }
    tokio::fs::write(&paths.records, lines).await.with_context(|| format!("Failed to write {}", paths.records.display()))?;

    let body = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    tokio::fs::write(&paths.report, body).await.with_context(|| format!("Failed to write {}", paths.report.display()))?;

    info!("💾 Wrote {} records to {}", records.len(), paths.records.display());
    info!("💾 Wrote run report to {}", paths.report.display());
    Ok(paths)
}
