use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ToolError;
use crate::processor::process::run_checked;
use crate::processor::TextExtractor;

/// `pdftotext` from poppler. Writes a `.txt` sidecar next to the PDF,
/// reads it back and removes it.
#[derive(Debug, Clone)]
pub struct PdfToText {
    program: String,
}

impl PdfToText {
    pub fn new() -> Self {
        Self {
            program: "pdftotext".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for PdfToText {
    fn default() -> Self {
        Self::new()
    }
}

/// Sidecar path for `pdf`: same directory and stem, `.txt` extension.
pub fn sidecar_path(pdf: &Path) -> PathBuf {
    pdf.with_extension("txt")
}

impl TextExtractor for PdfToText {
    fn extract(&self, pdf: &Path, limit: Duration) -> Result<String, ToolError> {
        let _span = tracing::info_span!("processor.text").entered();
        let sidecar = sidecar_path(pdf);

        let result = run_checked(&self.program, [pdf.as_os_str(), sidecar.as_os_str()], limit)
            .and_then(|()| {
                std::fs::read(&sidecar).map_err(|e| ToolError::Io {
                    path: sidecar.clone(),
                    source: e,
                })
            });
        let _ = std::fs::remove_file(&sidecar);

        Ok(String::from_utf8_lossy(&result?).into_owned())
    }
}
