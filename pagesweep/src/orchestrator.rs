use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::UnitCoordinator;
use crate::ledger::BatchLedger;
use crate::progress::{Pass, ProgressEvent, ProgressSink};
use crate::types::{Unit, UnitOutcome};

/// Runs units one at a time, largest first, and records every outcome
pub struct BatchOrchestrator {
    coordinator: UnitCoordinator,
    sink: Arc<dyn ProgressSink>,
    pass: Pass,
    cancel: CancellationToken,
    run_started: Option<Instant>,
    records_before: usize,
}

impl BatchOrchestrator {
    pub fn new(coordinator: UnitCoordinator, sink: Arc<dyn ProgressSink>, pass: Pass, cancel: CancellationToken) -> Self {
        Self { coordinator, sink, pass, cancel, run_started: None, records_before: 0 }
    }

    /// Report progress relative to the whole run: elapsed time counts from
    /// `run_started` and record totals start at `records_before`
    pub fn with_baseline(mut self, run_started: Instant, records_before: usize) -> Self {
        self.run_started = Some(run_started);
        self.records_before = records_before;
        self
    }

    /// Extract every unit and return a ledger holding exactly one outcome per unit.
    ///
    /// Units with the most expected records go first so the long tail overlaps
    /// nothing. Once cancelled, units not yet started are recorded as not run.
    pub async fn run_batch(&self, units: &[Unit]) -> BatchLedger {
        let started = Instant::now();
        let run_started = self.run_started.unwrap_or(started);
        let mut ledger = BatchLedger::for_units(units);

        let mut ordered: Vec<&Unit> = units.iter().collect();
        ordered.sort_by(|a, b| b.expected_record_count.cmp(&a.expected_record_count));

        let total = ordered.len();
        let expected: u64 = units.iter().map(|u| u.expected_record_count).sum();
        info!("🚀 Starting {} pass: {} units, {} expected records", self.pass, total, expected);

        let mut records_so_far = self.records_before;
        for (index, unit) in ordered.into_iter().enumerate() {
            let outcome = if self.cancel.is_cancelled() {
                warn!("⚠️ Skipping {} ({}) - shutdown requested", unit.name, unit.id);
                UnitOutcome::not_run(unit, "cancelled before extraction")
            } else {
                info!("[{}/{}] {} ({} expected records)", index + 1, total, unit.name, unit.expected_record_count);
                self.coordinator.extract(unit, &self.cancel).await
            };

            records_so_far += outcome.record_count();
            let event = ProgressEvent {
                pass: self.pass,
                units_completed: index + 1,
                units_total: total,
                records_so_far,
                elapsed_since_start: run_started.elapsed(),
                unit_id: outcome.unit_id.clone(),
                status: outcome.status(),
            };
            ledger.record(outcome);
            self.sink.on_unit_complete(&event);
        }

        info!("✅ {} pass finished: {} records from {} units in {:?}", self.pass, ledger.total_records(), ledger.len(), started.elapsed());
        ledger
    }
}
