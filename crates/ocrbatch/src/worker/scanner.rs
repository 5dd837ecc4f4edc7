use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info_span;
use walkdir::WalkDir;

use crate::db::node_repo::{self, FileAttrs, NodeChange, NodeId};
use crate::db::{record_repo, Database};
use crate::error::ScanError;
use crate::processor::pdf::page_count;
use crate::sanitize;

/// Extension of the documents tracked by the catalog, matched
/// case-insensitively.
pub const TRACKED_EXTENSION: &str = "pdf";

const HASH_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Stop after this many files were upserted.
    pub limit: Option<usize>,
    /// Recompute `tree_index` once the walk is done.
    pub reindex: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            limit: None,
            reindex: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub discovered: usize,
    pub created: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ScanReport {
    pub fn processed(&self) -> usize {
        self.created + self.changed + self.unchanged
    }

    fn record(&mut self, change: NodeChange) {
        match change {
            NodeChange::Created => self.created += 1,
            NodeChange::Changed => self.changed += 1,
            NodeChange::Unchanged => self.unchanged += 1,
        }
    }
}

/// Reconciles the catalog with the documents under a root directory.
pub struct Scanner {
    db: Database,
    root: PathBuf,
    options: ScanOptions,
}

impl Scanner {
    pub fn new<P: AsRef<Path>>(db: Database, root: P) -> Self {
        Self {
            db,
            root: root.as_ref().to_path_buf(),
            options: ScanOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the root and upserts every tracked document.
    ///
    /// Errors on a single file are logged and counted in
    /// [`ScanReport::failed`]; only a missing root aborts the scan.
    pub fn scan(&self) -> Result<ScanReport, ScanError> {
        if !self.root.is_dir() {
            return Err(ScanError::RootMissing(self.root.clone()));
        }
        let _span = info_span!("scan", root = %sanitize::redact_path(&self.root)).entered();

        let mut report = ScanReport::default();
        let mut dirs: HashMap<String, NodeId> = HashMap::new();

        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            if let Some(limit) = self.options.limit {
                if report.processed() >= limit {
                    info!("Scan limit of {} files reached", limit);
                    break;
                }
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    report.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_tracked(entry.path()) {
                continue;
            }

            report.discovered += 1;
            match self.scan_file(entry.path(), &mut dirs) {
                Ok(change) => {
                    debug!(
                        "{:?}: {}",
                        change,
                        sanitize::redact_path(entry.path())
                    );
                    report.record(change);
                }
                Err(e) => {
                    warn!(
                        "Error processing {}: {}",
                        sanitize::redact_path(entry.path()),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "Scan finished: {} discovered, {} new, {} changed, {} unchanged, {} failed",
            report.discovered, report.created, report.changed, report.unchanged, report.failed
        );

        if self.options.reindex {
            let count = node_repo::reindex(&self.db)?;
            info!("Reindexed {} nodes", count);
        }

        Ok(report)
    }

    fn scan_file(
        &self,
        path: &Path,
        dirs: &mut HashMap<String, NodeId>,
    ) -> Result<NodeChange, ScanError> {
        let rel = relative_catalog_path(&self.root, path)?;
        let metadata = std::fs::metadata(path).map_err(|e| ScanError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let checksum = fingerprint(path)?;
        let now = Utc::now();

        let parent_id = match node_repo::parent_path(&rel) {
            Some(dir) => Some(match dirs.get(dir) {
                Some(id) => *id,
                None => {
                    let id = node_repo::ensure_directory_chain(&self.db, dir, now)?;
                    dirs.insert(dir.to_string(), id);
                    id
                }
            }),
            None => None,
        };

        let attrs = FileAttrs {
            size: metadata.len(),
            mtime: metadata.modified().ok().map(DateTime::<Utc>::from),
            checksum,
            mime: mime_guess::from_path(path).first().map(|m| m.to_string()),
            extra: serde_json::json!({}),
        };
        let pages = if needs_page_count(&self.db, &rel, &attrs.checksum)? {
            page_count(path)
        } else {
            None
        };
        let outcome = node_repo::upsert_document(&self.db, &rel, parent_id, &attrs, pages, now)?;
        Ok(outcome.change)
    }
}

/// False when `rel` is cataloged with this checksum and already has a
/// record, in which case the upsert would discard a page count.
fn needs_page_count(db: &Database, rel: &str, checksum: &str) -> Result<bool, ScanError> {
    let node = match node_repo::find_by_path(db, rel)? {
        Some(node) if node.checksum.as_deref() == Some(checksum) => node,
        _ => return Ok(true),
    };
    Ok(record_repo::find(db, node.id)?.is_none())
}

pub fn is_tracked(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(TRACKED_EXTENSION))
        .unwrap_or(false)
}

/// Hex SHA-256 of the file content, read in 1 MiB blocks.
pub fn fingerprint(path: &Path) -> Result<String, ScanError> {
    let read_err = |e| ScanError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = File::open(path).map_err(read_err)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `path` relative to `root`, with `/` separators.
pub fn relative_catalog_path(root: &Path, path: &Path) -> Result<String, ScanError> {
    let rel = path.strip_prefix(root).map_err(|_| ScanError::OutsideRoot {
        path: path.to_path_buf(),
    })?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| ScanError::NonUtf8Path(path.to_path_buf()))?,
            ),
            _ => {
                return Err(ScanError::OutsideRoot {
                    path: path.to_path_buf(),
                })
            }
        }
    }
    Ok(parts.join("/"))
}
