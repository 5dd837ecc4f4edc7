use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrBatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting '{key}'")]
    Missing { key: &'static str },

    #[error("Invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Cannot determine a default database path (no home directory)")]
    NoDefaultDatabasePath,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Document root '{0}' does not exist or is not a directory")]
    RootMissing(PathBuf),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path '{path}' is not under the document root")]
    OutsideRoot { path: PathBuf },

    #[error("Path '{0}' is not valid UTF-8")]
    NonUtf8Path(PathBuf),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Catalog update failed: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// Failures reported by the external collaborators (OCR, text extraction).
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {diagnostic}")]
    NonZeroExit {
        program: String,
        status: String,
        diagnostic: String,
    },

    #[error("'{program}' timed out after {}s", .limit.as_secs())]
    Timeout { program: String, limit: Duration },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Source document not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Cannot derive output path for '{path}': {reason}")]
    OutputPath { path: PathBuf, reason: String },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog update failed: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Task queue is closed")]
    Closed,

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Search index request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Search index rejected document {id}: HTTP {status}")]
    Rejected { id: i64, status: u16 },
}

pub type Result<T> = std::result::Result<T, OcrBatchError>;
