//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

use super::status::{OcrStatus, Transition};

/// Errors from catalog operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A relative path was not in normalized form.
    #[error("Invalid catalog path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// A status value read from the store is not part of the state machine.
    #[error("Unknown OCR status '{0}'")]
    UnknownStatus(String),

    /// A status write was attempted from a state the transition does not allow.
    #[error("Transition {transition:?} not allowed from '{from}'")]
    InvalidTransition {
        transition: Transition,
        from: OcrStatus,
    },

    /// No node or record exists for the given key.
    #[error("No catalog entry for {0}")]
    NotFound(String),

    /// A parent reference points at a file node.
    #[error("Catalog node '{0}' exists but is not a directory")]
    NotADirectory(String),

    /// Another reindex is already running.
    #[error("A reindex is already in progress")]
    ReindexInProgress,
}
