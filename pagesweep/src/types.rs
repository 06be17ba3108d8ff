use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

/// Opaque, comparable identifier of a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for UnitId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// One independently extractable group of paginated data.
///
/// Units are loaded once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub expected_record_count: u64,
    pub expected_page_count: u32,
}

impl Unit {
    /// Build a unit from its expected record count, deriving `ceil(records / page_size)` pages
    pub fn new(id: impl Into<UnitId>, name: impl Into<String>, expected_record_count: u64, page_size: u32) -> Self {
        let pages = expected_record_count.div_ceil(u64::from(page_size.max(1)));
        Self {
            id: id.into(),
            name: name.into(),
            expected_record_count,
            expected_page_count: u32::try_from(pages).unwrap_or(u32::MAX),
        }
    }

    /// Build a unit from a page count when the listing only reports pages
    pub fn with_pages(id: impl Into<UnitId>, name: impl Into<String>, pages: u32, page_size: u32) -> Self {
        Self { id: id.into(), name: name.into(), expected_record_count: u64::from(pages) * u64::from(page_size), expected_page_count: pages }
    }
}

/// Contiguous, inclusive span of pages assigned to one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub unit_id: UnitId,
    pub start_page: u32,
    pub end_page: u32,
    pub worker_id: usize,
}

impl PageRange {
    pub fn page_count(&self) -> u32 {
        self.end_page - self.start_page + 1
    }

    pub fn pages(&self) -> RangeInclusive<u32> {
        self.start_page..=self.end_page
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{} pages {}-{}", self.worker_id, self.start_page, self.end_page)
    }
}

/// Record produced by a page fetcher.
///
/// The orchestrator only looks at `key` (deduplication), `ordinal` (final sort),
/// `group` (final sort grouping) and `unit_id` (owning unit). Everything else
/// travels untouched in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub ordinal: String,
    pub unit_id: UnitId,
    pub group: String,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    pub fn new(key: impl Into<String>, ordinal: impl Into<String>, unit_id: UnitId, group: impl Into<String>) -> Self {
        Self { key: key.into(), ordinal: ordinal.into(), unit_id, group: group.into(), data: serde_json::Map::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(name.into(), value);
        self
    }
}

/// Why a worker stopped iterating its range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    ConsecutiveFailures,
    Timeout,
    Cancelled,
    Panicked,
    SessionFailed,
    HardDeadline,
}

impl StopReason {
    /// Only an exhausted range counts as a clean finish
    pub fn is_success(&self) -> bool {
        matches!(self, StopReason::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::ConsecutiveFailures => "consecutive_failures",
            StopReason::Timeout => "timeout",
            StopReason::Cancelled => "cancelled",
            StopReason::Panicked => "panicked",
            StopReason::SessionFailed => "session_failed",
            StopReason::HardDeadline => "hard_deadline",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What one worker hands back for its range, whatever happened.
///
/// Records gathered before a failure are always kept.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub unit_id: UnitId,
    pub worker_id: usize,
    pub range: PageRange,
    pub records: Vec<Record>,
    pub pages_fetched: u32,
    pub failed_pages: Vec<u32>,
    pub elapsed: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub stop_reason: StopReason,
}

impl TaskResult {
    /// Result for a range whose records could not be retrieved at all
    pub fn lost(range: PageRange, stop_reason: StopReason, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            unit_id: range.unit_id.clone(),
            worker_id: range.worker_id,
            range,
            records: Vec::new(),
            pages_fetched: 0,
            failed_pages: Vec::new(),
            elapsed,
            success: false,
            error: Some(error.into()),
            stop_reason,
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

/// Derived classification of a unit's extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Success,
    ZeroYield,
    Errored,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Success => "success",
            UnitStatus::ZeroYield => "zero_yield",
            UnitStatus::Errored => "errored",
        }
    }

    pub fn is_gap(&self) -> bool {
        !matches!(self, UnitStatus::Success)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Union of all worker results for one unit
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit_id: UnitId,
    pub unit_name: String,
    pub expected_record_count: u64,
    pub records: Vec<Record>,
    pub errors: Vec<String>,
    pub workers: usize,
    pub failed_workers: usize,
    pub elapsed: Duration,
}

impl UnitOutcome {
    /// Merge every worker's output, failed or not, into one outcome
    pub fn from_results(unit: &Unit, results: Vec<TaskResult>, elapsed: Duration) -> Self {
        let workers = results.len();
        let mut records = Vec::with_capacity(results.iter().map(TaskResult::record_count).sum());
        let mut errors = Vec::new();
        let mut failed_workers = 0;

        for result in results {
            if !result.success {
                failed_workers += 1;
            }
            if let Some(error) = result.error {
                errors.push(format!("W{}: {}", result.worker_id, error));
            }
            records.extend(result.records);
        }

        Self {
            unit_id: unit.id.clone(),
            unit_name: unit.name.clone(),
            expected_record_count: unit.expected_record_count,
            records,
            errors,
            workers,
            failed_workers,
            elapsed,
        }
    }

    /// Outcome for a unit that was never dispatched
    pub fn not_run(unit: &Unit, reason: impl Into<String>) -> Self {
        Self {
            unit_id: unit.id.clone(),
            unit_name: unit.name.clone(),
            expected_record_count: unit.expected_record_count,
            records: Vec::new(),
            errors: vec![reason.into()],
            workers: 0,
            failed_workers: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Status is computed from the data on every call so it can never drift.
    ///
    /// A unit with any records is a success even if some of its workers failed.
    /// With no records, a reported error wins over a plain zero yield.
    pub fn status(&self) -> UnitStatus {
        if !self.records.is_empty() {
            return UnitStatus::Success;
        }
        if !self.errors.is_empty() {
            UnitStatus::Errored
        } else if self.expected_record_count > 0 {
            UnitStatus::ZeroYield
        } else {
            UnitStatus::Success
        }
    }
}
