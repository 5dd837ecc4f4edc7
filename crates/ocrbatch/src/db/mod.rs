//! Catalog store: durable persistence of filesystem nodes and per-document
//! OCR records.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`; each operation
//! holds the lock only for its own duration.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};

pub mod error;
pub mod migrations;
pub mod node_repo;
pub mod record_repo;
pub mod stats_repo;
pub mod status;

pub use error::DatabaseError;
pub use status::{OcrStatus, Transition};

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled for concurrent
/// read performance when the file is shared with other processes.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    reindexing: Arc<AtomicBool>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;

        migrations::run_all(&conn)?;

        log::info!("Catalog opened at {}", path.display());

        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            reindexing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits on `Ok`, rolls back on `Err`
    /// (the transaction is dropped without commit).
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Marks a reindex as running. Returns a guard that clears the flag on
    /// drop, or `ReindexInProgress` if one is already in flight.
    pub(crate) fn begin_reindex(&self) -> Result<ReindexGuard, DatabaseError> {
        if self
            .reindexing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DatabaseError::ReindexInProgress);
        }
        Ok(ReindexGuard {
            flag: Arc::clone(&self.reindexing),
        })
    }
}

pub(crate) struct ReindexGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ReindexGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Renders a timestamp in the fixed-width form stored in every `*_at`
/// column. Fixed width keeps string comparison equal to time comparison.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Returns the canonical database path: `~/.ocrbatch/data/catalog.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ocrbatch").join("data").join("catalog.db"))
}
