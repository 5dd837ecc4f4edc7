//! In-process stand-ins for the external tools.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use ocrbatch::processor::{OcrTool, TextExtractor};
use ocrbatch::sink::{IndexedDocument, SearchSink};
use ocrbatch::{SinkError, ToolError};

/// What the fake OCR tool does when run.
#[derive(Debug, Clone)]
pub enum OcrBehavior {
    /// Copies the input to the output path.
    Copy,
    /// Exits non-zero with the given stderr.
    Fail(String),
    /// Runs past its limit.
    Timeout,
    /// Cannot be started.
    Missing,
    Panic,
}

pub struct FakeOcr {
    behavior: OcrBehavior,
    calls: AtomicUsize,
}

impl FakeOcr {
    pub fn new(behavior: OcrBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrTool for FakeOcr {
    fn run(&self, input: &Path, output: &Path, limit: Duration) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            OcrBehavior::Copy => {
                std::fs::copy(input, output).map_err(|e| ToolError::Io {
                    path: output.to_path_buf(),
                    source: e,
                })?;
                Ok(())
            }
            OcrBehavior::Fail(stderr) => Err(ToolError::NonZeroExit {
                program: "ocrmypdf".to_string(),
                status: "exit status: 2".to_string(),
                diagnostic: stderr.clone(),
            }),
            OcrBehavior::Timeout => Err(ToolError::Timeout {
                program: "ocrmypdf".to_string(),
                limit,
            }),
            OcrBehavior::Missing => Err(ToolError::Spawn {
                program: "ocrmypdf".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            }),
            OcrBehavior::Panic => panic!("ocr tool crashed"),
        }
    }
}

/// Returns fixed text, or fails when constructed with `None`.
pub struct FakeExtractor {
    text: Option<String>,
}

impl FakeExtractor {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { text: None }
    }
}

impl TextExtractor for FakeExtractor {
    fn extract(&self, pdf: &Path, _limit: Duration) -> Result<String, ToolError> {
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => Err(ToolError::NonZeroExit {
                program: "pdftotext".to_string(),
                status: format!("exit status: 1 ({})", pdf.display()),
                diagnostic: "Syntax Error: broken xref".to_string(),
            }),
        }
    }
}

/// Records indexed documents; rejects all of them when `reject` is set.
#[derive(Default)]
pub struct RecordingSink {
    pub docs: Mutex<Vec<(i64, String, String)>>,
    pub reject: bool,
}

impl SearchSink for RecordingSink {
    fn index(&self, doc: &IndexedDocument<'_>) -> Result<(), SinkError> {
        if self.reject {
            return Err(SinkError::Rejected {
                id: doc.id,
                status: 503,
            });
        }
        self.docs
            .lock()
            .unwrap()
            .push((doc.id, doc.path.to_string(), doc.text.to_string()));
        Ok(())
    }
}
