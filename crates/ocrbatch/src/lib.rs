pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod processor;
pub mod recovery;
pub mod report;
pub mod sanitize;
pub mod sink;
pub mod worker;

pub use config::{load_settings, load_settings_from, Settings};
pub use db::{Database, DatabaseError, OcrStatus, Transition};
pub use dispatch::{DispatchReport, Dispatcher, TaskQueue};
pub use error::{
    ConfigError, OcrBatchError, QueueError, Result, ScanError, SinkError, ToolError, WorkerError,
};
pub use monitor::{Monitor, MonitorExit, ProgressSnapshot};
pub use report::StatusReport;
pub use worker::{
    AttemptOutcome, RetryPolicy, ScanOptions, ScanReport, Scanner, TaskExecutor, TaskReport,
    WorkUnit, WorkerPool,
};
