use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info_span, warn};

use crate::config::Settings;
use crate::db::record_repo::{self, SuccessReport, MAX_ERROR_CHARS};
use crate::db::{Database, OcrStatus};
use crate::error::{OcrBatchError, ToolError, WorkerError};
use crate::processor::{OcrMyPdf, OcrTool, PdfToText, TextExtractor};
use crate::sanitize::{self, truncate_chars};
use crate::sink::{sink_from_settings, IndexedDocument, SearchSink};
use crate::worker::job::{AttemptOutcome, WorkUnit};
use crate::worker::output::OutputLayout;
use crate::worker::pool::UnitHandler;

/// Wall-clock limits of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLimits {
    /// OCR subprocess limit.
    pub soft: Duration,
    /// Whole attempt, OCR and extraction together.
    pub hard: Duration,
    pub extract: Duration,
}

impl AttemptLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            soft: settings.ocr.soft_timeout,
            hard: settings.ocr.hard_timeout,
            extract: settings.ocr.extract_timeout,
        }
    }
}

/// Executes work units end to end: claim, OCR, extraction, report and
/// optional indexing.
pub struct TaskExecutor {
    db: Database,
    layout: OutputLayout,
    ocr: Arc<dyn OcrTool>,
    extractor: Arc<dyn TextExtractor>,
    sink: Option<Arc<dyn SearchSink>>,
    limits: AttemptLimits,
}

impl TaskExecutor {
    pub fn new(
        db: Database,
        layout: OutputLayout,
        ocr: Arc<dyn OcrTool>,
        extractor: Arc<dyn TextExtractor>,
        limits: AttemptLimits,
    ) -> Self {
        Self {
            db,
            layout,
            ocr,
            extractor,
            sink: None,
            limits,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SearchSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds an executor with `ocrmypdf`, `pdftotext` and the configured
    /// search sink.
    pub fn from_settings(
        db: Database,
        settings: &Settings,
        root: &Path,
    ) -> Result<Self, OcrBatchError> {
        let layout = OutputLayout::new(root, &settings.output_dir_name_for(root))?;
        let executor = Self::new(
            db,
            layout,
            Arc::new(OcrMyPdf::new(settings.ocr.language.clone())),
            Arc::new(PdfToText::new()),
            AttemptLimits::from_settings(settings),
        );
        let sink = sink_from_settings(settings.search.as_ref()).map_err(|e| {
            crate::error::ConfigError::Validation {
                message: format!("cannot set up search indexing: {}", e),
            }
        })?;
        Ok(match sink {
            Some(sink) => executor.with_sink(Arc::from(sink)),
            None => executor,
        })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Runs one attempt.
    ///
    /// A rejected claim touches nothing. Once claimed, the record ends the
    /// attempt as `done` or `failed`. Errors and panics past the claim are
    /// stored as a failure and then returned as `Err`.
    pub fn execute(&self, unit: &WorkUnit) -> Result<AttemptOutcome, WorkerError> {
        let _span = info_span!("attempt",
            task_id = %unit.task_id,
            node_id = unit.node_id,
            filename = %sanitize::redact_path(&unit.path),
        )
        .entered();

        if !record_repo::claim(&self.db, unit.node_id, Utc::now())? {
            log::info!(
                "Node {} is no longer pending, skipping task {}",
                unit.node_id,
                unit.task_id
            );
            return Ok(AttemptOutcome::ClaimRejected);
        }

        let started = Instant::now();
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_claimed(unit, started))) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                self.record_unexpected(unit, &e.to_string());
                Err(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.record_unexpected(unit, &message);
                Err(WorkerError::Panicked(message))
            }
        }
    }

    fn run_claimed(
        &self,
        unit: &WorkUnit,
        started: Instant,
    ) -> Result<AttemptOutcome, WorkerError> {
        if !unit.path.is_file() {
            return Err(WorkerError::SourceMissing(unit.path.clone()));
        }

        let output = {
            let _step = info_span!("resolve_output").entered();
            self.layout.prepare(&unit.path)?
        };

        {
            let _step = info_span!("ocr").entered();
            let limit = self.limits.soft.min(remaining(started, self.limits.hard));
            let result = if limit.is_zero() {
                Err(ToolError::Timeout {
                    program: "ocr".to_string(),
                    limit: self.limits.hard,
                })
            } else {
                self.ocr.run(&unit.path, &output, limit)
            };
            if let Err(e) = result {
                let error = failure_message(&e);
                warn!("OCR failed for node {}: {}", unit.node_id, error);
                record_repo::report_failure(&self.db, unit.node_id, &error, Utc::now())?;
                return Ok(AttemptOutcome::Failed {
                    error: truncate_chars(&error, MAX_ERROR_CHARS).to_string(),
                });
            }
        }

        let text = {
            let _step = info_span!("extract_text").entered();
            self.extract_text(&output, started)
        };

        let report = SuccessReport::new(output.to_string_lossy(), text);
        record_repo::report_success(&self.db, unit.node_id, &report, Utc::now())?;

        let indexed = {
            let _step = info_span!("index").entered();
            self.index(unit, report.text.as_deref())
        };

        log::info!(
            "Node {} done in {:.1}s",
            unit.node_id,
            started.elapsed().as_secs_f32()
        );
        Ok(AttemptOutcome::Done {
            output_path: output,
            text_len: report.text.as_ref().map(|t| t.chars().count()),
            indexed,
        })
    }

    /// Extraction failure leaves the attempt successful with no text.
    fn extract_text(&self, output: &Path, started: Instant) -> Option<String> {
        let limit = self.limits.extract.min(remaining(started, self.limits.hard));
        if limit.is_zero() {
            warn!("No time left for text extraction of {}", sanitize::redact_path(output));
            return None;
        }
        match self.extractor.extract(output, limit) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(
                    "Text extraction failed for {}: {}",
                    sanitize::redact_path(output),
                    e
                );
                None
            }
        }
    }

    /// Sink failures are logged and never change the recorded outcome.
    fn index(&self, unit: &WorkUnit, text: Option<&str>) -> bool {
        let (Some(sink), Some(text)) = (&self.sink, text) else {
            return false;
        };
        let rel = relative_display(self.layout.root(), &unit.path);
        let doc = IndexedDocument {
            id: unit.node_id,
            path: &rel,
            text,
        };
        match sink.index(&doc) {
            Ok(()) => true,
            Err(e) => {
                warn!("Indexing node {} failed: {}", unit.node_id, e);
                false
            }
        }
    }

    fn record_unexpected(&self, unit: &WorkUnit, detail: &str) {
        let message = format!("Unexpected error: {}", detail);
        log::error!("Task {} for node {}: {}", unit.task_id, unit.node_id, message);
        if let Err(e) = record_repo::report_failure(&self.db, unit.node_id, &message, Utc::now()) {
            log::error!("Could not record failure of node {}: {}", unit.node_id, e);
        }
    }
}

impl UnitHandler for TaskExecutor {
    fn handle(&self, unit: &WorkUnit) -> Result<AttemptOutcome, WorkerError> {
        self.execute(unit)
    }

    /// A retry can only win the claim while the record is `pending`. An
    /// error past the claim has already recorded `failed`, so it is final
    /// until an operator resets it.
    fn should_retry(&self, unit: &WorkUnit, _error: &WorkerError) -> bool {
        match record_repo::find(&self.db, unit.node_id) {
            Ok(Some(record)) => record.status == OcrStatus::Pending,
            Ok(None) => false,
            Err(e) => {
                warn!("Cannot read record of node {}: {}", unit.node_id, e);
                true
            }
        }
    }
}

fn remaining(started: Instant, budget: Duration) -> Duration {
    budget.saturating_sub(started.elapsed())
}

fn failure_message(e: &ToolError) -> String {
    match e {
        ToolError::Timeout { limit, .. } => {
            format!("Timeout processing PDF (>{}s)", limit.as_secs())
        }
        ToolError::NonZeroExit {
            program,
            diagnostic,
            ..
        } => format!("{} error: {}", program, diagnostic),
        other => other.to_string(),
    }
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(PathBuf::from)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
