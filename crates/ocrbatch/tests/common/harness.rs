//! Isolated catalog plus document root for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use lopdf::{dictionary, Document, Object, Stream};

use ocrbatch::db::node_repo::{self, NodeId};
use ocrbatch::db::record_repo::{self, RecordRow};
use ocrbatch::processor::{OcrTool, TextExtractor};
use ocrbatch::worker::{AttemptLimits, OutputLayout};
use ocrbatch::{Database, ScanReport, Scanner, TaskExecutor, WorkUnit};

pub const TEST_LIMITS: AttemptLimits = AttemptLimits {
    soft: Duration::from_secs(5),
    hard: Duration::from_secs(10),
    extract: Duration::from_secs(2),
};

pub struct TestHarness {
    temp_dir: TempDir,
    /// Document root, `<temp>/docs`.
    pub root: PathBuf,
    pub db: Database,
}

impl TestHarness {
    /// A fresh root and a file-backed catalog next to it.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("docs");
        std::fs::create_dir_all(&root).expect("Failed to create document root");
        let db = Database::open(&temp_dir.path().join("catalog.db"))
            .expect("Failed to open catalog");
        Self { temp_dir, root, db }
    }

    /// Writes `content` at `rel` under the root.
    pub fn write_file(&self, rel: &str, content: &[u8]) -> PathBuf {
        let child = self.temp_dir.child("docs").child(rel);
        std::fs::create_dir_all(child.path().parent().unwrap()).unwrap();
        child.write_binary(content).expect("Failed to write fixture");
        child.path().to_path_buf()
    }

    /// Writes a valid PDF with `pages` pages at `rel`.
    pub fn write_pdf(&self, rel: &str, pages: usize) -> PathBuf {
        self.write_file(rel, &pdf_bytes(pages))
    }

    pub fn remove_file(&self, rel: &str) {
        std::fs::remove_file(self.root.join(rel)).expect("Failed to remove fixture");
    }

    pub fn scan(&self) -> ScanReport {
        Scanner::new(self.db.clone(), &self.root)
            .scan()
            .expect("scan failed")
    }

    pub fn node_id(&self, rel: &str) -> NodeId {
        node_repo::find_by_path(&self.db, rel)
            .unwrap()
            .unwrap_or_else(|| panic!("no node for {rel}"))
            .id
    }

    pub fn record(&self, rel: &str) -> RecordRow {
        record_repo::find(&self.db, self.node_id(rel))
            .unwrap()
            .unwrap_or_else(|| panic!("no record for {rel}"))
    }

    pub fn unit(&self, rel: &str) -> WorkUnit {
        WorkUnit::new(self.node_id(rel), self.root.join(rel))
    }

    pub fn output_root(&self) -> PathBuf {
        self.temp_dir.path().join("docs_ocr")
    }

    pub fn executor(
        &self,
        ocr: Arc<dyn OcrTool>,
        extractor: Arc<dyn TextExtractor>,
    ) -> TaskExecutor {
        let layout = OutputLayout::new(&self.root, "docs_ocr").unwrap();
        TaskExecutor::new(self.db.clone(), layout, ocr, extractor, TEST_LIMITS)
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Bytes of a minimal PDF with `pages` blank pages.
pub fn pdf_bytes(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for _ in 0..pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
        });
        kids.push(Object::from(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
