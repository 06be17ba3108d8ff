//! Worker and coordinator behavior against a mockall-generated fetcher

use mockall::Sequence;
use mockall::predicate::eq;
use pagesweep::coordinator::UnitCoordinator;
use pagesweep::error::FetchError;
use pagesweep::fetcher::MockPageFetcher;
use pagesweep::types::StopReason;
use pagesweep::worker::{ExtractionWorker, WorkerPolicy};
use pagesweep::{PageRange, Record, Unit, UnitId, UnitStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn unit() -> Unit {
    Unit::with_pages("m", "Mocked", 6, 2)
}

fn two_records(page: u32) -> Vec<Record> {
    (0..2).map(|i| Record::new(format!("m-{}-{}", page, i), page.to_string(), UnitId::from("m"), "Mocked")).collect()
}

fn policy(threshold: u32) -> WorkerPolicy {
    WorkerPolicy { consecutive_failure_threshold: threshold, max_page_attempts: 1, retry_delay: Duration::ZERO, ..WorkerPolicy::default() }
}

#[tokio::test]
async fn test_partial_records_survive_a_failing_tail() {
    let mut fetcher = MockPageFetcher::new();
    let mut seq = Sequence::new();
    for page in 1..=2 {
        fetcher.expect_fetch().with(mockall::predicate::always(), eq(page)).times(1).in_sequence(&mut seq).returning(|_, page| Ok(two_records(page)));
    }
    for page in 3..=4 {
        fetcher
            .expect_fetch()
            .with(mockall::predicate::always(), eq(page))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(FetchError::Malformed("layout changed".to_string())));
    }

    let range = PageRange { unit_id: UnitId::from("m"), start_page: 1, end_page: 6, worker_id: 1 };
    let result = ExtractionWorker::new(policy(2)).run(&unit(), range, &fetcher, &CancellationToken::new()).await;

    assert!(!result.success);
    assert_eq!(result.stop_reason, StopReason::ConsecutiveFailures);
    assert_eq!(result.record_count(), 4);
    assert_eq!(result.pages_fetched, 2);
    assert_eq!(result.failed_pages, vec![3, 4]);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_every_page_requested_exactly_once() {
    let mut fetcher = MockPageFetcher::new();
    for page in 1..=6 {
        fetcher.expect_fetch().with(mockall::predicate::always(), eq(page)).times(1).returning(|_, page| Ok(two_records(page)));
    }

    let coordinator = UnitCoordinator::new(
        Arc::new(Arc::new(fetcher)),
        pagesweep::coordinator::PassSettings { worker_budget: 4, poll_interval: Duration::from_millis(5), worker: policy(5), ..Default::default() },
    );
    let outcome = coordinator.extract(&unit(), &CancellationToken::new()).await;

    assert_eq!(outcome.status(), UnitStatus::Success);
    assert_eq!(outcome.record_count(), 12);
    assert_eq!(outcome.workers, 4);
}

#[tokio::test]
async fn test_all_pages_failing_is_errored() {
    let mut fetcher = MockPageFetcher::new();
    fetcher.expect_fetch().returning(|_, _| Err(FetchError::Status(500)));

    let coordinator = UnitCoordinator::new(
        Arc::new(Arc::new(fetcher)),
        pagesweep::coordinator::PassSettings { worker_budget: 2, poll_interval: Duration::from_millis(5), worker: policy(2), ..Default::default() },
    );
    let outcome = coordinator.extract(&unit(), &CancellationToken::new()).await;

    assert_eq!(outcome.status(), UnitStatus::Errored);
    assert_eq!(outcome.failed_workers, 2);
    assert_eq!(outcome.errors.len(), 2);
}
