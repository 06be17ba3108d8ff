use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fetcher::PageFetcher;
use crate::types::{PageRange, Record, StopReason, TaskResult, Unit};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Limits a worker applies to itself while walking its range
#[derive(Debug, Clone)]
pub struct WorkerPolicy {
    /// Wall-clock budget for the whole range, checked before each page
    pub timeout: Duration,
    /// Upper bound for one fetch attempt
    pub page_timeout: Duration,
    pub consecutive_failure_threshold: u32,
    pub max_page_attempts: u32,
    /// First retry pause; doubled per attempt up to 30s
    pub retry_delay: Duration,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            page_timeout: Duration::from_secs(30),
            consecutive_failure_threshold: 5,
            max_page_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

enum PageOutcome {
    Fetched(Vec<Record>),
    Failed(FetchError),
    Panicked(String),
}

/// Walks one page range with one fetch session.
///
/// The worker never touches shared state; everything it learns is in the
/// returned `TaskResult`, including records fetched before it had to stop.
#[derive(Debug, Clone, Default)]
pub struct ExtractionWorker {
    policy: WorkerPolicy,
}

impl ExtractionWorker {
    pub fn new(policy: WorkerPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WorkerPolicy {
        &self.policy
    }

    pub async fn run(&self, unit: &Unit, range: PageRange, fetcher: &dyn PageFetcher, cancel: &CancellationToken) -> TaskResult {
        let started = Instant::now();
        let tag = format!("[{}:W{}]", unit.id, range.worker_id);
        let threshold = self.policy.consecutive_failure_threshold.max(1);

        let mut records = Vec::new();
        let mut failed_pages = Vec::new();
        let mut pages_fetched = 0u32;
        let mut consecutive_failures = 0u32;
        let mut stop_reason = StopReason::Completed;
        let mut error = None;
        let mut last_failure = None;

        info!("{} 🚀 Starting pages {}-{} (timeout: {:?})", tag, range.start_page, range.end_page, self.policy.timeout);

        for page in range.pages() {
            if cancel.is_cancelled() {
                stop_reason = StopReason::Cancelled;
                error = Some(format!("cancelled before page {}", page));
                break;
            }

            let elapsed = started.elapsed();
            if elapsed >= self.policy.timeout {
                warn!("{} ⏰ Timeout after {:?} before page {}", tag, elapsed, page);
                stop_reason = StopReason::Timeout;
                error = Some(format!("worker timeout after {:?} before page {}", elapsed, page));
                break;
            }

            match self.fetch_page(unit, page, fetcher, self.policy.timeout - elapsed).await {
                PageOutcome::Fetched(page_records) => {
                    consecutive_failures = 0;
                    pages_fetched += 1;
                    records.extend(page_records);
                }
                PageOutcome::Failed(e) => {
                    consecutive_failures += 1;
                    failed_pages.push(page);
                    warn!("{} ⚠️ Page {} failed ({}/{} consecutive): {}", tag, page, consecutive_failures, threshold, e);
                    if consecutive_failures >= threshold {
                        stop_reason = StopReason::ConsecutiveFailures;
                        error = Some(format!("{} consecutive page failures, last on page {}: {}", consecutive_failures, page, e));
                        break;
                    }
                    last_failure = Some((page, e));
                }
                PageOutcome::Panicked(message) => {
                    stop_reason = StopReason::Panicked;
                    error = Some(format!("fetch panicked on page {}: {}", page, message));
                    break;
                }
            }

            if page % 10 == 0 || page == range.end_page {
                info!("{} Page {}/{} - {} records", tag, page, range.end_page, records.len());
            }
        }

        // Failed pages are reported even when the range ran to the end
        if error.is_none() {
            if let Some((page, e)) = &last_failure {
                error = Some(format!("{} of {} pages failed, last on page {}: {}", failed_pages.len(), range.page_count(), page, e));
            }
        }

        let elapsed = started.elapsed();
        match (&error, stop_reason.is_success()) {
            (None, _) => info!("{} ✅ Complete: {} records in {:?}", tag, records.len(), elapsed),
            (Some(e), true) => warn!("{} ⚠️ Complete with {} records in {:?}: {}", tag, records.len(), elapsed, e),
            (Some(e), false) => warn!("{} ❌ Stopped ({}) with {} records: {}", tag, stop_reason, records.len(), e),
        }

        TaskResult {
            unit_id: unit.id.clone(),
            worker_id: range.worker_id,
            range,
            records,
            pages_fetched,
            failed_pages,
            elapsed,
            success: stop_reason.is_success(),
            error,
            stop_reason,
        }
    }

    /// Fetch one page with retries, never exceeding `remaining`
    async fn fetch_page(&self, unit: &Unit, page: u32, fetcher: &dyn PageFetcher, remaining: Duration) -> PageOutcome {
        let deadline = Instant::now() + remaining;
        let attempts = self.policy.max_page_attempts.max(1);
        let mut backoff = self.policy.retry_delay;
        let mut last_error = FetchError::Timeout(Duration::ZERO);

        for attempt in 1..=attempts {
            let budget = self.policy.page_timeout.min(deadline.saturating_duration_since(Instant::now()));
            if budget.is_zero() {
                break;
            }

            let call = AssertUnwindSafe(fetcher.fetch(unit, page)).catch_unwind();
            match timeout(budget, call).await {
                Ok(Ok(Ok(records))) => return PageOutcome::Fetched(records),
                Ok(Ok(Err(e))) => last_error = e,
                Ok(Err(panic)) => return PageOutcome::Panicked(panic_message(panic)),
                Err(_) => last_error = FetchError::Timeout(budget),
            }

            if attempt < attempts {
                debug!("🔄 Retrying page {} of {} (attempt {}/{}): {}", page, unit.id, attempt + 1, attempts, last_error);
                sleep(backoff.min(deadline.saturating_duration_since(Instant::now()))).await;
                backoff = (backoff * 2).min(MAX_RETRY_DELAY);
            }
        }

        PageOutcome::Failed(last_error)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
