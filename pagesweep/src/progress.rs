use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::types::{UnitId, UnitStatus};

/// Which extraction pass produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Main,
    Recovery,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Main => write!(f, "main"),
            Pass::Recovery => write!(f, "recovery"),
        }
    }
}

/// Emitted once after every unit a pass finishes
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub pass: Pass,
    /// Unit counts are per pass
    pub units_completed: usize,
    pub units_total: usize,
    /// Records kept so far in the run, main-pass records included during recovery
    pub records_so_far: usize,
    /// Time since the run started
    pub elapsed_since_start: Duration,
    pub unit_id: UnitId,
    pub status: UnitStatus,
}

/// Receives progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn on_unit_complete(&self, event: &ProgressEvent);
}

/// `HH:MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Writes one log line per event
#[derive(Debug, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_unit_complete(&self, event: &ProgressEvent) {
        info!(
            "📊 [{}] {}/{} units | {} records | {} elapsed | last: {} ({})",
            event.pass,
            event.units_completed,
            event.units_total,
            event.records_so_far,
            format_elapsed(event.elapsed_since_start),
            event.unit_id,
            event.status
        );
    }
}

/// Point-in-time copy of the board, served by the status endpoints
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardSnapshot {
    pub phase: String,
    pub pass: Option<Pass>,
    pub units_completed: usize,
    pub units_total: usize,
    pub records_so_far: usize,
    pub elapsed_secs: f64,
    pub last_unit: Option<UnitId>,
    pub gaps: usize,
    pub started: bool,
    pub finished: bool,
}

/// Shared view of the run, updated from progress events and read by the status server
#[derive(Debug, Default)]
pub struct ProgressBoard {
    state: RwLock<BoardSnapshot>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_phase(&self, phase: impl Into<String>) {
        let mut state = self.state.write();
        state.phase = phase.into();
        state.started = true;
    }

    pub fn mark_finished(&self) {
        let mut state = self.state.write();
        state.phase = "finished".to_string();
        state.finished = true;
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.state.read().clone()
    }
}

impl ProgressSink for ProgressBoard {
    fn on_unit_complete(&self, event: &ProgressEvent) {
        let mut state = self.state.write();
        // a new pass starts its counters over
        if state.pass != Some(event.pass) {
            state.gaps = 0;
        }
        state.started = true;
        state.pass = Some(event.pass);
        state.units_completed = event.units_completed;
        state.units_total = event.units_total;
        state.records_so_far = event.records_so_far;
        state.elapsed_secs = event.elapsed_since_start.as_secs_f64();
        state.last_unit = Some(event.unit_id.clone());
        if event.status.is_gap() {
            state.gaps += 1;
        }
    }
}

/// Terminal progress bar over units
pub struct BarProgressSink {
    bar: ProgressBar,
}

impl BarProgressSink {
    pub fn new(units_total: usize) -> Self {
        let bar = ProgressBar::new(units_total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} units {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    pub fn hidden() -> Self {
        Self { bar: ProgressBar::hidden() }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarProgressSink {
    fn on_unit_complete(&self, event: &ProgressEvent) {
        self.bar.set_length(event.units_total as u64);
        self.bar.set_position(event.units_completed as u64);
        self.bar.set_message(format!("[{}] {} records", event.pass, event.records_so_far));
    }
}

/// Forwards every event to each inner sink in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressSink for FanoutSink {
    fn on_unit_complete(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.on_unit_complete(event);
        }
    }
}
