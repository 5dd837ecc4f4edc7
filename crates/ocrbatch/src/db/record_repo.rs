//! Record repository — per-document OCR state in `pdf_metadata`.
//!
//! Status writes are conditional updates restricted to the source states
//! of a [`Transition`]. `claim` is the only one whose rejection is not an
//! error: it is the concurrency gate between workers.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

use super::node_repo::NodeId;
use super::{timestamp, Database, DatabaseError, OcrStatus, Transition};
use crate::sanitize::truncate_chars;

/// Longest error message stored in `last_error`, in characters.
pub const MAX_ERROR_CHARS: usize = 500;

/// Length of the stored text preview, in characters.
pub const PREVIEW_CHARS: usize = 1000;

/// Rows fetched per round trip by [`EligibleIter`].
const ELIGIBLE_BATCH: usize = 500;

/// A raw `pdf_metadata` row.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub node_id: NodeId,
    pub pages: Option<u32>,
    pub text_found: bool,
    pub status: OcrStatus,
    pub last_error: Option<String>,
    pub ocr_pdf_path: Option<String>,
    pub ocr_text: Option<String>,
    pub snippet: Option<String>,
    pub ocr_started_at: Option<String>,
    pub ocr_finished_at: Option<String>,
    pub updated_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            node_id: row.get("node_id")?,
            pages: row.get("pages")?,
            text_found: row.get("text_found")?,
            status: row.get("ocr_status")?,
            last_error: row.get("last_error")?,
            ocr_pdf_path: row.get("ocr_pdf_path")?,
            ocr_text: row.get("ocr_text")?,
            snippet: row.get("snippet")?,
            ocr_started_at: row.get("ocr_started_at")?,
            ocr_finished_at: row.get("ocr_finished_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Result of a successful attempt, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessReport {
    pub output_path: String,
    pub text: Option<String>,
    pub preview: Option<String>,
}

impl SuccessReport {
    /// Builds a report whose preview is the first [`PREVIEW_CHARS`]
    /// characters of `text`.
    pub fn new(output_path: impl Into<String>, text: Option<String>) -> Self {
        let preview = text
            .as_deref()
            .map(|t| truncate_chars(t, PREVIEW_CHARS).to_string());
        Self {
            output_path: output_path.into(),
            text,
            preview,
        }
    }

    fn text_found(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Finds the record for a node.
pub fn find(db: &Database, node_id: NodeId) -> Result<Option<RecordRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM pdf_metadata WHERE node_id = ?1",
                params![node_id],
                RecordRow::from_row,
            )
            .optional()?)
    })
}

/// Inserts a `pending` record for the node unless one already exists.
pub(crate) fn create_pending_in(
    conn: &Connection,
    node_id: NodeId,
    pages: Option<u32>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO pdf_metadata (node_id, pages, text_found, ocr_status, updated_at)
         VALUES (?1, ?2, 0, ?3, ?4)
         ON CONFLICT(node_id) DO NOTHING",
        params![node_id, pages, OcrStatus::Pending, timestamp(now)],
    )?;
    Ok(())
}

/// Resets a record to `pending` after its content changed, discarding the
/// results and error of any earlier attempt.
pub(crate) fn reset_for_changed_content_in(
    conn: &Connection,
    node_id: NodeId,
    pages: Option<u32>,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let transition = Transition::ContentChanged;
    let sql = format!(
        "UPDATE pdf_metadata
         SET ocr_status = ?2, pages = ?3, text_found = 0, last_error = NULL,
             ocr_pdf_path = NULL, ocr_text = NULL, snippet = NULL,
             ocr_started_at = NULL, ocr_finished_at = NULL, updated_at = ?4
         WHERE node_id = ?1 AND {}",
        transition.source_predicate()
    );
    let changed = conn.execute(
        &sql,
        params![node_id, transition.target(), pages, timestamp(now)],
    )?;
    if changed == 0 {
        create_pending_in(conn, node_id, pages, now)?;
    }
    Ok(())
}

/// Atomically moves a record from `pending` to `processing`.
///
/// Returns `false` when the record is not `pending` (already claimed,
/// finished or failed). Exactly one of any number of concurrent callers
/// observes `true`.
pub fn claim(db: &Database, node_id: NodeId, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    let transition = Transition::Claim;
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE pdf_metadata
             SET ocr_status = ?2, ocr_started_at = ?3, ocr_finished_at = NULL, updated_at = ?3
             WHERE node_id = ?1 AND {}",
            transition.source_predicate()
        );
        let changed = conn.execute(&sql, params![node_id, transition.target(), timestamp(now)])?;
        Ok(changed == 1)
    })
}

/// Records a finished attempt: `processing` to `done`.
pub fn report_success(
    db: &Database,
    node_id: NodeId,
    report: &SuccessReport,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let now = timestamp(now);
    db.with_conn(|conn| {
        apply_transition(
            conn,
            node_id,
            Transition::Succeed,
            "ocr_pdf_path = ?3, ocr_text = ?4, snippet = ?5, text_found = ?6,
             last_error = NULL, ocr_finished_at = ?7, updated_at = ?7",
            &[
                &report.output_path,
                &report.text,
                &report.preview,
                &report.text_found(),
                &now,
            ],
        )
    })
}

/// Records a failed attempt: `processing` to `failed`. The message is cut
/// to [`MAX_ERROR_CHARS`] characters.
pub fn report_failure(
    db: &Database,
    node_id: NodeId,
    message: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let message = truncate_chars(message, MAX_ERROR_CHARS);
    let now = timestamp(now);
    db.with_conn(|conn| {
        apply_transition(
            conn,
            node_id,
            Transition::Fail,
            "last_error = ?3, ocr_finished_at = ?4, updated_at = ?4",
            &[&message, &now],
        )
    })
}

/// Moves every `failed` record back to `pending`, clearing its error.
pub fn reset_failed_to_pending(db: &Database, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    let transition = Transition::RetryFailed;
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE pdf_metadata SET ocr_status = ?1, last_error = NULL, updated_at = ?2
             WHERE {}",
            transition.source_predicate()
        );
        Ok(conn.execute(&sql, params![transition.target(), timestamp(now)])?)
    })
}

/// Moves `processing` records whose attempt started more than `threshold`
/// before `now` back to `pending`.
pub fn reset_stuck_to_pending(
    db: &Database,
    threshold: Duration,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let transition = Transition::FreeStuck;
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE pdf_metadata SET ocr_status = ?1, updated_at = ?2
             WHERE {} AND ocr_started_at IS NOT NULL AND ocr_started_at < ?3",
            transition.source_predicate()
        );
        Ok(conn.execute(
            &sql,
            params![
                transition.target(),
                timestamp(now),
                stuck_cutoff(threshold, now)
            ],
        )?)
    })
}

/// Start timestamps strictly before this value are stuck.
pub(crate) fn stuck_cutoff(threshold: Duration, now: DateTime<Utc>) -> String {
    timestamp(now - threshold)
}

/// Runs a guarded status update. `?1` is the node id and `?2` the target
/// status; `set` may bind `?3` onwards from `extra`.
fn apply_transition(
    conn: &Connection,
    node_id: NodeId,
    transition: Transition,
    set: &str,
    extra: &[&dyn ToSql],
) -> Result<(), DatabaseError> {
    let sql = format!(
        "UPDATE pdf_metadata SET ocr_status = ?2, {} WHERE node_id = ?1 AND {}",
        set,
        transition.source_predicate()
    );
    let target = transition.target();
    let mut bound: Vec<&dyn ToSql> = vec![&node_id, &target];
    bound.extend_from_slice(extra);

    if conn.execute(&sql, bound.as_slice())? == 1 {
        return Ok(());
    }

    let current: Option<OcrStatus> = conn
        .query_row(
            "SELECT ocr_status FROM pdf_metadata WHERE node_id = ?1",
            params![node_id],
            |r| r.get(0),
        )
        .optional()?;
    match current {
        None => Err(DatabaseError::NotFound(format!("record {}", node_id))),
        Some(from) => Err(DatabaseError::InvalidTransition { transition, from }),
    }
}

/// One document selected for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleRow {
    pub node_id: NodeId,
    pub path: String,
}

/// Selects records in `status` in ascending path order, up to `limit`.
///
/// The iterator reads lazily in keyset-paginated batches, so records whose
/// status changes while it is consumed are neither repeated nor reordered.
/// It ends after the first error.
pub fn select_eligible(db: &Database, status: OcrStatus, limit: Option<usize>) -> EligibleIter {
    EligibleIter {
        db: db.clone(),
        status,
        remaining: limit,
        after: None,
        buffer: VecDeque::new(),
        exhausted: false,
    }
}

pub struct EligibleIter {
    db: Database,
    status: OcrStatus,
    remaining: Option<usize>,
    after: Option<String>,
    buffer: VecDeque<EligibleRow>,
    exhausted: bool,
}

impl EligibleIter {
    fn fetch(&mut self) -> Result<(), DatabaseError> {
        let batch = self
            .remaining
            .map_or(ELIGIBLE_BATCH, |r| r.min(ELIGIBLE_BATCH));
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.id, n.path
                 FROM pdf_metadata m JOIN nodes n ON n.id = m.node_id
                 WHERE m.ocr_status = ?1 AND (?2 IS NULL OR n.path > ?2)
                 ORDER BY n.path ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![self.status, self.after, batch as i64], |r| {
                Ok(EligibleRow {
                    node_id: r.get(0)?,
                    path: r.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })?;

        if rows.len() < batch {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.after = Some(last.path.clone());
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for EligibleIter {
    type Item = Result<EligibleRow, DatabaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let row = self.buffer.pop_front()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(Ok(row))
    }
}
