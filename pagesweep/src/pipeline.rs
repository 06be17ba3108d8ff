//! The four-phase run: extract every unit, detect gaps, recover them once, merge

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::coordinator::{PassSettings, UnitCoordinator};
use crate::fetcher::FetcherFactory;
use crate::gaps::{detect_gaps, gap_report};
use crate::ledger::BatchLedger;
use crate::merge::merge;
use crate::orchestrator::BatchOrchestrator;
use crate::progress::{Pass, ProgressBoard, ProgressSink};
use crate::recovery::RecoveryCoordinator;
use crate::report::{PassSummary, RunReport};
use crate::types::{Record, Unit};

pub struct PipelineOutput {
    pub records: Vec<Record>,
    pub report: RunReport,
}

pub struct Pipeline {
    factory: Arc<dyn FetcherFactory>,
    main: PassSettings,
    recovery: Option<PassSettings>,
    sink: Arc<dyn ProgressSink>,
    board: Option<Arc<ProgressBoard>>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(factory: Arc<dyn FetcherFactory>, main: PassSettings, sink: Arc<dyn ProgressSink>, cancel: CancellationToken) -> Self {
        Self { factory, main, recovery: None, sink, board: None, cancel }
    }

    /// Enable the recovery pass
    pub fn with_recovery(mut self, settings: PassSettings) -> Self {
        self.recovery = Some(settings);
        self
    }

    /// Publish phase changes to a status board
    pub fn with_board(mut self, board: Arc<ProgressBoard>) -> Self {
        self.board = Some(board);
        self
    }

    fn phase(&self, phase: &str) {
        if let Some(board) = &self.board {
            board.set_phase(phase);
        }
    }

    pub async fn run(&self, units: &[Unit]) -> PipelineOutput {
        let started_at = Utc::now();
        let started = Instant::now();

        self.phase("extracting");
        let main_orchestrator =
            BatchOrchestrator::new(UnitCoordinator::new(self.factory.clone(), self.main.clone()), self.sink.clone(), Pass::Main, self.cancel.clone());
        let main_ledger = main_orchestrator.run_batch(units).await;

        self.phase("detecting_gaps");
        let gaps = gap_report(&main_ledger);
        let worklist = detect_gaps(&main_ledger);
        if worklist.is_empty() {
            info!("✅ No gaps after main pass");
        } else {
            warn!("⚠️ {} gaps after main pass: {:?}", worklist.len(), worklist);
        }

        let recovery_ledger = match &self.recovery {
            Some(_) if worklist.is_empty() => None,
            Some(_) if self.cancel.is_cancelled() => {
                warn!("⚠️ Shutdown requested, skipping recovery of {} units", worklist.len());
                None
            }
            Some(settings) => {
                self.phase("recovering");
                let recovery = RecoveryCoordinator::new(self.factory.clone(), settings.clone(), self.sink.clone(), self.cancel.clone())
                    .with_baseline(started, main_ledger.total_records());
                Some(recovery.recover(&worklist, units).await)
            }
            None => {
                if !worklist.is_empty() {
                    info!("⏭️ Recovery disabled, {} gaps left as is", worklist.len());
                }
                None
            }
        };

        self.phase("merging");
        let merged = merge(&main_ledger, recovery_ledger.as_ref().unwrap_or(&BatchLedger::default()));

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            duration_secs: started.elapsed().as_secs_f64(),
            cancelled: self.cancel.is_cancelled(),
            main: PassSummary::from_ledger(&main_ledger),
            recovery: recovery_ledger.as_ref().map(PassSummary::from_ledger),
            gaps,
            stats: merged.stats,
        };

        if let Some(board) = &self.board {
            board.mark_finished();
        }

        PipelineOutput { records: merged.records, report }
    }
}
