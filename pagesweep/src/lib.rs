// Library exports for the binary, integration tests and benches

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod gaps;
pub mod health;
pub mod ledger;
pub mod merge;
pub mod orchestrator;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod recovery;
pub mod report;
pub mod source;
pub mod types;
pub mod worker;

pub use fetcher::{FetcherFactory, PageFetcher};
pub use ledger::BatchLedger;
pub use types::{PageRange, Record, TaskResult, Unit, UnitId, UnitOutcome, UnitStatus};
