use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use crate::error::ToolError;
use crate::processor::process::run_checked;
use crate::processor::OcrTool;

/// `ocrmypdf` with cleanup, background removal and deskew enabled.
#[derive(Debug, Clone)]
pub struct OcrMyPdf {
    program: String,
    language: String,
}

impl OcrMyPdf {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            program: "ocrmypdf".to_string(),
            language: language.into(),
        }
    }

    /// Uses a different executable, e.g. a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn args<'a>(&'a self, input: &'a Path, output: &'a Path) -> Vec<&'a OsStr> {
        vec![
            OsStr::new("--clean"),
            OsStr::new("--remove-background"),
            OsStr::new("--deskew"),
            OsStr::new("-l"),
            OsStr::new(&self.language),
            input.as_os_str(),
            output.as_os_str(),
        ]
    }
}

impl OcrTool for OcrMyPdf {
    fn run(&self, input: &Path, output: &Path, limit: Duration) -> Result<(), ToolError> {
        let _span = tracing::info_span!("processor.ocr", language = %self.language).entered();
        run_checked(&self.program, self.args(input, output), limit)
    }
}
