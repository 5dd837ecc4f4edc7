use std::path::PathBuf;

use crate::db::node_repo::NodeId;
use crate::error::WorkerError;

/// One OCR attempt for one document, as submitted to the task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub task_id: String,
    pub node_id: NodeId,
    /// Absolute path of the source document.
    pub path: PathBuf,
}

impl WorkUnit {
    pub fn new(node_id: NodeId, path: PathBuf) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            node_id,
            path,
        }
    }
}

/// How an attempt that did not error ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The record was not `pending`; nothing was touched.
    ClaimRejected,
    /// The record is now `done`.
    Done {
        output_path: PathBuf,
        /// Length in characters of the extracted text, `None` when
        /// extraction failed.
        text_len: Option<usize>,
        indexed: bool,
    },
    /// The record is now `failed` with `error` stored.
    Failed { error: String },
}

impl AttemptOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, AttemptOutcome::Done { .. })
    }
}

/// Final result of a unit after the transport retry layer gave up or
/// succeeded.
#[derive(Debug)]
pub struct TaskReport {
    pub task_id: String,
    pub node_id: NodeId,
    pub attempts: u32,
    pub result: Result<AttemptOutcome, WorkerError>,
}
