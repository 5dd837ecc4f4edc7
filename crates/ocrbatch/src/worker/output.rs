//! Output locations: a sibling tree of the document root that mirrors its
//! directory structure.

use std::path::{Component, Path, PathBuf};

use crate::error::WorkerError;

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    output_root: PathBuf,
}

impl OutputLayout {
    /// Places the output tree at `<parent of root>/<output_dir_name>`.
    ///
    /// `output_dir_name` must be a single path component and must not name
    /// the document root itself, which is never written to.
    pub fn new(root: &Path, output_dir_name: &str) -> Result<Self, WorkerError> {
        let invalid = |reason: &str| WorkerError::OutputPath {
            path: root.to_path_buf(),
            reason: reason.to_string(),
        };

        let parent = root
            .parent()
            .ok_or_else(|| invalid("document root has no parent directory"))?;

        let mut components = Path::new(output_dir_name).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single {
            return Err(invalid(&format!(
                "output directory name '{}' must be a single directory name",
                output_dir_name
            )));
        }

        let output_root = parent.join(output_dir_name);
        if same_location(root, &output_root) {
            return Err(invalid(&format!(
                "output directory '{}' is the document root",
                output_root.display()
            )));
        }

        Ok(Self {
            root: root.to_path_buf(),
            output_root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Output path for `source`. The same source always maps to the same
    /// output path.
    pub fn output_path_for(&self, source: &Path) -> Result<PathBuf, WorkerError> {
        let rel = source
            .strip_prefix(&self.root)
            .map_err(|_| WorkerError::OutputPath {
                path: source.to_path_buf(),
                reason: "not under the document root".to_string(),
            })?;
        if rel.as_os_str().is_empty()
            || !rel.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(WorkerError::OutputPath {
                path: source.to_path_buf(),
                reason: "relative path must name a file without '..' or '.'".to_string(),
            });
        }
        Ok(self.output_root.join(rel))
    }

    /// Resolves the output path and creates its parent directories.
    /// Concurrent callers creating the same directories is harmless.
    pub fn prepare(&self, source: &Path) -> Result<PathBuf, WorkerError> {
        let out = self.output_path_for(source)?;
        if let Some(dir) = out.parent() {
            std::fs::create_dir_all(dir).map_err(|e| WorkerError::CreateDirectory {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }
        Ok(out)
    }
}

/// Equal as written, or equal once both resolve on disk.
fn same_location(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
