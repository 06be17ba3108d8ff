use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::{PassSettings, UnitCoordinator};
use crate::fetcher::FetcherFactory;
use crate::ledger::BatchLedger;
use crate::orchestrator::BatchOrchestrator;
use crate::progress::{Pass, ProgressSink};
use crate::types::{Unit, UnitId, UnitStatus};

/// Re-extracts gap units once, with fewer workers and a fixed timeout
pub struct RecoveryCoordinator {
    orchestrator: BatchOrchestrator,
}

impl RecoveryCoordinator {
    pub fn new(factory: Arc<dyn FetcherFactory>, settings: PassSettings, sink: Arc<dyn ProgressSink>, cancel: CancellationToken) -> Self {
        let coordinator = UnitCoordinator::new(factory, settings);
        Self { orchestrator: BatchOrchestrator::new(coordinator, sink, Pass::Recovery, cancel) }
    }

    /// Continue the main pass's progress counters instead of restarting them
    pub fn with_baseline(mut self, run_started: Instant, records_before: usize) -> Self {
        self.orchestrator = self.orchestrator.with_baseline(run_started, records_before);
        self
    }

    /// Run one pass over `worklist`.
    ///
    /// Ids missing from `units` are skipped with a warning. The returned ledger
    /// holds an outcome for every known id in the worklist and nothing else.
    pub async fn recover(&self, worklist: &[UnitId], units: &[Unit]) -> BatchLedger {
        if worklist.is_empty() {
            info!("✅ No gaps to recover");
            return BatchLedger::default();
        }

        let by_id: HashMap<&UnitId, &Unit> = units.iter().map(|u| (&u.id, u)).collect();
        let mut targets = Vec::with_capacity(worklist.len());
        for id in worklist {
            match by_id.get(id) {
                Some(unit) if !targets.iter().any(|t: &Unit| &t.id == id) => targets.push((*unit).clone()),
                Some(_) => {}
                None => warn!("⚠️ Unit {} is not in the unit list, skipping recovery", id),
            }
        }

        info!("🔄 Recovering {} units", targets.len());
        let ledger = self.orchestrator.run_batch(&targets).await;

        let recovered = ledger.count_status(UnitStatus::Success);
        info!("🔄 Recovery finished: {}/{} units recovered, {} records", recovered, targets.len(), ledger.total_records());
        for outcome in ledger.iter().filter(|o| o.status().is_gap()) {
            warn!("⚠️ {} ({}) still {} after recovery", outcome.unit_name, outcome.unit_id, outcome.status());
        }
        ledger
    }
}
