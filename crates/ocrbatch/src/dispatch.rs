//! Turns `pending` records into work units on a task queue.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use tracing::info_span;

use crate::db::record_repo::{self, EligibleRow};
use crate::db::{Database, OcrStatus};
use crate::error::{OcrBatchError, QueueError};
use crate::sanitize;
use crate::worker::job::WorkUnit;

/// Accepts work units for asynchronous execution.
pub trait TaskQueue {
    fn submit(&self, unit: WorkUnit) -> Result<(), QueueError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub selected: usize,
    pub enqueued: usize,
    /// Records whose file no longer exists under the root.
    pub skipped: usize,
}

pub struct Dispatcher {
    db: Database,
    root: PathBuf,
}

impl Dispatcher {
    pub fn new<P: AsRef<Path>>(db: Database, root: P) -> Self {
        Self {
            db,
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Submits one unit per `pending` record, in path order, up to `limit`.
    ///
    /// Records are not claimed here; the worker's claim decides who runs
    /// them, so re-running a dispatch is harmless. A closed queue stops the
    /// run and is returned as an error.
    pub fn run(
        &self,
        queue: &dyn TaskQueue,
        limit: Option<usize>,
    ) -> Result<DispatchReport, OcrBatchError> {
        let _span = info_span!("dispatch", limit = ?limit).entered();
        let mut report = DispatchReport::default();

        for row in record_repo::select_eligible(&self.db, OcrStatus::Pending, limit) {
            let EligibleRow { node_id, path } = row?;
            report.selected += 1;

            let source = self.root.join(&path);
            if !source.is_file() {
                warn!(
                    "Skipping node {}: file not found ({})",
                    node_id,
                    sanitize::redact_path(&source)
                );
                report.skipped += 1;
                continue;
            }

            let unit = WorkUnit::new(node_id, source);
            debug!("Enqueuing task {} for node {}", unit.task_id, node_id);
            queue.submit(unit)?;
            report.enqueued += 1;
        }

        info!(
            "Dispatch finished: {} selected, {} enqueued, {} skipped",
            report.selected, report.enqueued, report.skipped
        );
        Ok(report)
    }
}
