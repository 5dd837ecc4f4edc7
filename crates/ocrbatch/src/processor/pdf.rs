use std::path::Path;

/// Number of pages in the PDF at `path`, or `None` when the document
/// cannot be parsed. Never fails: the count is informational.
pub fn page_count(path: &Path) -> Option<u32> {
    match lopdf::Document::load(path) {
        Ok(doc) => u32::try_from(doc.get_pages().len()).ok(),
        Err(e) => {
            log::debug!(
                "Could not read page count of {}: {}",
                crate::sanitize::redact_path(path),
                e
            );
            None
        }
    }
}
