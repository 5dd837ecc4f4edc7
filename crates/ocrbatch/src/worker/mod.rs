pub mod executor;
pub mod job;
pub mod output;
pub mod pool;
pub mod retry;
pub mod scanner;

pub use executor::{AttemptLimits, TaskExecutor};
pub use job::{AttemptOutcome, TaskReport, WorkUnit};
pub use output::OutputLayout;
pub use pool::{UnitHandler, WorkerPool};
pub use retry::{run_with_retry, RetryPolicy};
pub use scanner::{ScanOptions, ScanReport, Scanner};
