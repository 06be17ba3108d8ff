use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

use crate::ledger::BatchLedger;
use crate::types::{Record, UnitId};

static ORDINAL_MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[º°ª]").expect("ordinal marker pattern is valid"));

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeStats {
    pub expected: u64,
    pub actual: usize,
    /// Rounded to two decimals; 100 when nothing was expected
    pub completeness_percent: f64,
    pub duplicates_removed: usize,
    pub failed_units: Vec<UnitId>,
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub records: Vec<Record>,
    pub stats: MergeStats,
}

/// Turn an ordinal token such as `"12º"` into a number; anything unparseable is 0
pub fn normalize_ordinal(ordinal: &str) -> i64 {
    ORDINAL_MARKERS.replace_all(ordinal, "").trim().parse().unwrap_or(0)
}

/// Combine both passes into one deduplicated, sorted record set.
///
/// A unit present in `recovery` contributes only its recovery records.
/// Duplicates by key keep the first occurrence in unit order. The result is
/// ordered by `(group, ordinal)`, with ties left in collection order.
pub fn merge(main: &BatchLedger, recovery: &BatchLedger) -> MergeOutput {
    let effective = main.with_overrides(recovery);

    let total: usize = effective.iter().map(|o| o.record_count()).sum();
    let mut seen = HashSet::with_capacity(total);
    let mut records = Vec::with_capacity(total);
    for outcome in effective.iter() {
        for record in &outcome.records {
            if seen.insert(record.key.as_str()) {
                records.push(record.clone());
            }
        }
    }
    let duplicates_removed = total - records.len();

    records.sort_by_cached_key(|r| (r.group.clone(), normalize_ordinal(&r.ordinal)));

    let expected = effective.expected_records();
    let actual = records.len();
    let completeness_percent = completeness(actual, expected);
    let failed_units = effective.iter().filter(|o| o.status().is_gap()).map(|o| o.unit_id.clone()).collect();

    let stats = MergeStats { expected, actual, completeness_percent, duplicates_removed, failed_units };
    log_validation(&stats);

    MergeOutput { records, stats }
}

fn completeness(actual: usize, expected: u64) -> f64 {
    if expected == 0 {
        return 100.0;
    }
    let percent = actual as f64 / expected as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

fn log_validation(stats: &MergeStats) {
    if stats.duplicates_removed > 0 {
        info!("🧹 Removed {} duplicate records", stats.duplicates_removed);
    }

    if stats.actual as u64 == stats.expected {
        info!("✅ Validation: {} records, exactly as expected", stats.actual);
    } else if stats.completeness_percent >= 95.0 {
        warn!("⚠️ Validation: {} of {} records ({:.2}%)", stats.actual, stats.expected, stats.completeness_percent);
    } else {
        error!("❌ Validation: {} of {} records ({:.2}%)", stats.actual, stats.expected, stats.completeness_percent);
    }

    if !stats.failed_units.is_empty() {
        warn!("⚠️ {} units failed permanently: {:?}", stats.failed_units.len(), stats.failed_units);
    }
}
