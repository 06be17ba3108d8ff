use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::fetcher::FetcherFactory;
use crate::partition::partition;
use crate::types::{PageRange, StopReason, TaskResult, Unit, UnitOutcome};
use crate::worker::{ExtractionWorker, WorkerPolicy};

/// How long a worker may spend on its range
#[derive(Debug, Clone)]
pub enum TimeoutPolicy {
    /// `max(minimum, pages_per_worker * seconds_per_page + margin)`
    Dynamic { minimum: Duration, seconds_per_page: f64, margin: Duration },
    Fixed(Duration),
}

impl TimeoutPolicy {
    pub fn worker_timeout(&self, pages_per_worker: u32) -> Duration {
        match self {
            TimeoutPolicy::Fixed(timeout) => *timeout,
            TimeoutPolicy::Dynamic { minimum, seconds_per_page, margin } => {
                let estimate = Duration::try_from_secs_f64(f64::from(pages_per_worker) * seconds_per_page).unwrap_or(Duration::ZERO);
                (estimate + *margin).max(*minimum)
            }
        }
    }
}

/// Parameters of one extraction pass (main or recovery)
#[derive(Debug, Clone)]
pub struct PassSettings {
    pub worker_budget: usize,
    pub timeout: TimeoutPolicy,
    /// Template for every worker; its `timeout` is replaced per unit
    pub worker: WorkerPolicy,
    /// Extra time past the worker timeout before the task is aborted
    pub hard_deadline_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            worker_budget: 10,
            timeout: TimeoutPolicy::Dynamic { minimum: Duration::from_secs(3600), seconds_per_page: 3.0, margin: Duration::from_secs(600) },
            worker: WorkerPolicy::default(),
            hard_deadline_grace: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

struct Dispatched {
    range: PageRange,
    handle: JoinHandle<TaskResult>,
    dispatched_at: Instant,
}

/// Extracts a single unit with a bounded set of concurrent workers
pub struct UnitCoordinator {
    factory: Arc<dyn FetcherFactory>,
    settings: PassSettings,
}

impl UnitCoordinator {
    pub fn new(factory: Arc<dyn FetcherFactory>, settings: PassSettings) -> Self {
        Self { factory, settings }
    }

    pub fn settings(&self) -> &PassSettings {
        &self.settings
    }

    pub async fn extract(&self, unit: &Unit, cancel: &CancellationToken) -> UnitOutcome {
        let started = Instant::now();
        let ranges = partition(&unit.id, unit.expected_page_count, self.settings.worker_budget);

        if ranges.is_empty() {
            info!("⏭️ Skipping {} - no pages", unit.name);
            return UnitOutcome::from_results(unit, Vec::new(), Duration::ZERO);
        }

        let pages_per_worker = ranges.iter().map(PageRange::page_count).max().unwrap_or(0);
        let worker_timeout = self.settings.timeout.worker_timeout(pages_per_worker);
        let hard_deadline = worker_timeout + self.settings.hard_deadline_grace;

        info!("🏛️ UNIT: {} (ID: {})", unit.name, unit.id);
        info!("Pages: {} | Workers: {} | Timeout: {:?}", unit.expected_page_count, ranges.len(), worker_timeout);
        for range in &ranges {
            debug!("  {} ({} pages)", range, range.page_count());
        }

        let worker = Arc::new(ExtractionWorker::new(WorkerPolicy { timeout: worker_timeout, ..self.settings.worker.clone() }));
        let shared_unit = Arc::new(unit.clone());

        // partition never yields more ranges than the budget, so every range gets its own task
        let pending: Vec<Dispatched> = ranges.into_iter().map(|range| self.dispatch(range, &shared_unit, &worker, cancel)).collect();

        let mut results = self.collect(pending, hard_deadline, unit).await;
        results.sort_by_key(|r| r.worker_id);

        let outcome = UnitOutcome::from_results(unit, results, started.elapsed());
        info!("📊 Unit complete: {} records in {:?} ({})", outcome.record_count(), outcome.elapsed, outcome.status());
        outcome
    }

    fn dispatch(&self, range: PageRange, unit: &Arc<Unit>, worker: &Arc<ExtractionWorker>, cancel: &CancellationToken) -> Dispatched {
        let factory = self.factory.clone();
        let unit = unit.clone();
        let worker = worker.clone();
        let cancel = cancel.clone();
        let task_range = range.clone();

        let handle = tokio::spawn(async move {
            match factory.open_session(&unit, task_range.worker_id).await {
                Ok(session) => worker.run(&unit, task_range, session.as_ref(), &cancel).await,
                Err(e) => {
                    error!("❌ [{}:W{}] Session failed: {}", unit.id, task_range.worker_id, e);
                    TaskResult::lost(task_range, StopReason::SessionFailed, e.to_string(), Duration::ZERO)
                }
            }
        });

        Dispatched { range, handle, dispatched_at: Instant::now() }
    }

    /// Poll every task instead of awaiting any single one, so a hung worker
    /// can never hold up collection of its siblings
    async fn collect(&self, mut pending: Vec<Dispatched>, hard_deadline: Duration, unit: &Unit) -> Vec<TaskResult> {
        let total = pending.len();
        let mut results = Vec::with_capacity(total);
        let mut ticker = interval(self.settings.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !pending.is_empty() {
            ticker.tick().await;

            let mut still_pending = Vec::with_capacity(pending.len());
            for task in pending {
                if task.handle.is_finished() {
                    let result = join_result(task).await;
                    if result.success {
                        info!("✅ W{} done: {} records", result.worker_id, result.record_count());
                    } else {
                        error!("❌ W{} failed with {} records: {}", result.worker_id, result.record_count(), result.error.as_deref().unwrap_or("unknown"));
                    }
                    results.push(result);
                } else if task.dispatched_at.elapsed() >= hard_deadline {
                    task.handle.abort();
                    error!("❌ W{} exceeded hard deadline of {:?}, aborted", task.range.worker_id, hard_deadline);
                    results.push(TaskResult::lost(
                        task.range,
                        StopReason::HardDeadline,
                        format!("aborted after hard deadline of {:?}", hard_deadline),
                        task.dispatched_at.elapsed(),
                    ));
                } else {
                    still_pending.push(task);
                }
            }
            pending = still_pending;

            if !pending.is_empty() {
                debug!("⏳ {}: {}/{} workers finished", unit.id, total - pending.len(), total);
            }
        }

        results
    }
}

async fn join_result(task: Dispatched) -> TaskResult {
    let elapsed = task.dispatched_at.elapsed();
    match task.handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => TaskResult::lost(task.range, StopReason::Panicked, format!("worker panicked: {}", e), elapsed),
        Err(e) => TaskResult::lost(task.range, StopReason::Cancelled, format!("worker task cancelled: {}", e), elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetcher::PageFetcher;
    use crate::types::{Record, UnitStatus};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct TenPerPage;

    #[async_trait]
    impl PageFetcher for TenPerPage {
        async fn fetch(&self, unit: &Unit, page: u32) -> Result<Vec<Record>, FetchError> {
            Ok((0..10).map(|i| Record::new(format!("{}-{}-{}", unit.id, page, i), (page * 10 + i).to_string(), unit.id.clone(), "g")).collect())
        }
    }

    struct AlwaysUnavailable;

    #[async_trait]
    impl PageFetcher for AlwaysUnavailable {
        async fn fetch(&self, _unit: &Unit, _page: u32) -> Result<Vec<Record>, FetchError> {
            Err(FetchError::Status(503))
        }
    }

    /// Opens sessions normally except for the listed workers, which hang or panic
    struct StubbornFactory {
        hang: HashSet<usize>,
        panic: HashSet<usize>,
        refuse: HashSet<usize>,
    }

    #[async_trait]
    impl FetcherFactory for StubbornFactory {
        async fn open_session(&self, _unit: &Unit, worker_id: usize) -> Result<Box<dyn PageFetcher>, FetchError> {
            if self.hang.contains(&worker_id) {
                std::future::pending::<()>().await;
            }
            if self.panic.contains(&worker_id) {
                panic!("browser crashed");
            }
            if self.refuse.contains(&worker_id) {
                return Err(FetchError::Session("no browser available".to_string()));
            }
            Ok(Box::new(TenPerPage))
        }
    }

    fn settings(budget: usize) -> PassSettings {
        PassSettings {
            worker_budget: budget,
            timeout: TimeoutPolicy::Fixed(Duration::from_secs(60)),
            worker: WorkerPolicy { max_page_attempts: 1, retry_delay: Duration::ZERO, ..WorkerPolicy::default() },
            hard_deadline_grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn stubborn(hang: &[usize], panic: &[usize], refuse: &[usize]) -> Arc<dyn FetcherFactory> {
        Arc::new(StubbornFactory {
            hang: hang.iter().copied().collect(),
            panic: panic.iter().copied().collect(),
            refuse: refuse.iter().copied().collect(),
        })
    }

    #[test]
    fn test_dynamic_timeout() {
        let policy = TimeoutPolicy::Dynamic { minimum: Duration::from_secs(3600), seconds_per_page: 3.0, margin: Duration::from_secs(600) };
        // small units get the minimum
        assert_eq!(policy.worker_timeout(10), Duration::from_secs(3600));
        // large units scale with their pages
        assert_eq!(policy.worker_timeout(2000), Duration::from_secs(6600));
        assert_eq!(TimeoutPolicy::Fixed(Duration::from_secs(600)).worker_timeout(2000), Duration::from_secs(600));
    }

    #[test]
    fn test_dynamic_timeout_rejects_nonsense_estimate() {
        let policy = TimeoutPolicy::Dynamic { minimum: Duration::from_secs(10), seconds_per_page: -1.0, margin: Duration::from_secs(1) };
        assert_eq!(policy.worker_timeout(100), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_seven_pages_three_workers() {
        let coordinator = UnitCoordinator::new(Arc::new(Arc::new(TenPerPage)), settings(3));
        let unit = Unit::with_pages("A", "Unit A", 7, 10);

        let outcome = coordinator.extract(&unit, &CancellationToken::new()).await;

        assert_eq!(outcome.status(), UnitStatus::Success);
        assert_eq!(outcome.record_count(), 70);
        assert_eq!(outcome.workers, 3);
        assert_eq!(outcome.failed_workers, 0);
        // records come back in range order
        assert_eq!(outcome.records.first().map(|r| r.key.as_str()), Some("A-1-0"));
        assert_eq!(outcome.records.last().map(|r| r.key.as_str()), Some("A-7-9"));
    }

    #[tokio::test]
    async fn test_zero_pages_is_trivial_success() {
        let coordinator = UnitCoordinator::new(Arc::new(Arc::new(TenPerPage)), settings(3));
        let outcome = coordinator.extract(&Unit::new("E", "Empty", 0, 10), &CancellationToken::new()).await;

        assert_eq!(outcome.status(), UnitStatus::Success);
        assert_eq!(outcome.workers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_worker_is_aborted_and_siblings_kept() {
        let coordinator = UnitCoordinator::new(stubborn(&[2], &[], &[]), settings(3));
        let unit = Unit::with_pages("H", "Hung", 9, 10);

        let started = Instant::now();
        let outcome = coordinator.extract(&unit, &CancellationToken::new()).await;

        assert!(started.elapsed() >= Duration::from_secs(65));
        assert_eq!(outcome.record_count(), 60);
        assert_eq!(outcome.failed_workers, 1);
        assert_eq!(outcome.status(), UnitStatus::Success);
        assert!(outcome.errors[0].contains("hard deadline"));
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_failed_result() {
        let coordinator = UnitCoordinator::new(stubborn(&[], &[1], &[]), settings(2));
        let unit = Unit::with_pages("P", "Panicky", 4, 10);

        let outcome = coordinator.extract(&unit, &CancellationToken::new()).await;

        assert_eq!(outcome.record_count(), 20);
        assert_eq!(outcome.failed_workers, 1);
        assert!(outcome.errors[0].contains("panicked"));
    }

    #[tokio::test]
    async fn test_all_sessions_refused_is_errored() {
        let coordinator = UnitCoordinator::new(stubborn(&[], &[], &[1, 2]), settings(2));
        let unit = Unit::with_pages("R", "Refused", 4, 10);

        let outcome = coordinator.extract(&unit, &CancellationToken::new()).await;

        assert_eq!(outcome.status(), UnitStatus::Errored);
        assert_eq!(outcome.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_small_unit_with_every_page_failing_is_errored() {
        // one page per worker, so no worker ever reaches the consecutive-failure threshold
        let coordinator = UnitCoordinator::new(Arc::new(Arc::new(AlwaysUnavailable)), settings(10));
        let unit = Unit::with_pages("S", "Small", 3, 10);

        let outcome = coordinator.extract(&unit, &CancellationToken::new()).await;

        assert_eq!(outcome.workers, 3);
        assert_eq!(outcome.failed_workers, 0);
        assert_eq!(outcome.status(), UnitStatus::Errored);
        assert_eq!(outcome.errors.len(), 3);
        assert!(outcome.errors.iter().all(|e| e.contains("1 of 1 pages failed")));
    }
}
