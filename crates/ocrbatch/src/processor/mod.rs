//! External collaborators of a work attempt: the OCR tool and the text
//! extractor, plus best-effort PDF inspection used by the scanner.

pub mod ocr;
pub mod pdf;
pub mod process;
pub mod text;

use std::path::Path;
use std::time::Duration;

use crate::error::ToolError;

pub use ocr::OcrMyPdf;
pub use text::PdfToText;

/// Produces a searchable copy of `input` at `output`.
pub trait OcrTool: Send + Sync {
    fn run(&self, input: &Path, output: &Path, limit: Duration) -> Result<(), ToolError>;
}

/// Extracts plain text from a PDF produced by an [`OcrTool`].
pub trait TextExtractor: Send + Sync {
    fn extract(&self, pdf: &Path, limit: Duration) -> Result<String, ToolError>;
}
