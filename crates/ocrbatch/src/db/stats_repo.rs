//! Read-only aggregate queries over the catalog, used by the monitor and
//! the status report.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::Serialize;

use super::node_repo::NodeId;
use super::record_repo::stuck_cutoff;
use super::{Database, DatabaseError, OcrStatus};

/// Number of records in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn get(&self, status: OcrStatus) -> u64 {
        match status {
            OcrStatus::Pending => self.pending,
            OcrStatus::Processing => self.processing,
            OcrStatus::Done => self.done,
            OcrStatus::Failed => self.failed,
        }
    }

    fn slot(&mut self, status: OcrStatus) -> &mut u64 {
        match status {
            OcrStatus::Pending => &mut self.pending,
            OcrStatus::Processing => &mut self.processing,
            OcrStatus::Done => &mut self.done,
            OcrStatus::Failed => &mut self.failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.done + self.failed
    }

    /// Records that reached a terminal state (`done` or `failed`).
    pub fn finished(&self) -> u64 {
        self.done + self.failed
    }

    /// Records still `pending` or `processing`.
    pub fn active(&self) -> u64 {
        self.pending + self.processing
    }
}

/// Counts records per status.
pub fn status_counts(db: &Database) -> Result<StatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT ocr_status, COUNT(*) FROM pdf_metadata GROUP BY ocr_status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, OcrStatus>(0)?, r.get::<_, i64>(1)?)))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, n) = row?;
            *counts.slot(status) = n.max(0) as u64;
        }
        Ok(counts)
    })
}

/// Counts `processing` records that started more than `threshold` ago.
pub fn count_stuck(
    db: &Database,
    threshold: Duration,
    now: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pdf_metadata
             WHERE ocr_status = ?1 AND ocr_started_at IS NOT NULL AND ocr_started_at < ?2",
            params![OcrStatus::Processing, stuck_cutoff(threshold, now)],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    })
}

/// Returns up to `n` document paths in `status`, in path order.
pub fn sample_paths(
    db: &Database,
    status: OcrStatus,
    n: usize,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT n.path FROM pdf_metadata m JOIN nodes n ON n.id = m.node_id
             WHERE m.ocr_status = ?1 ORDER BY n.path ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![status, n as i64], |r| r.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

/// A failed record with its stored error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRow {
    pub node_id: NodeId,
    pub path: String,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// Returns the `n` most recently updated failed records.
pub fn recent_failures(db: &Database, n: usize) -> Result<Vec<FailureRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT m.node_id, n.path, m.last_error, m.updated_at
             FROM pdf_metadata m JOIN nodes n ON n.id = m.node_id
             WHERE m.ocr_status = ?1
             ORDER BY m.updated_at DESC, n.path ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![OcrStatus::Failed, n as i64], |r| {
            Ok(FailureRow {
                node_id: r.get(0)?,
                path: r.get(1)?,
                last_error: r.get(2)?,
                updated_at: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::node_repo::{self, FileAttrs};
    use crate::db::record_repo;
    use chrono::TimeZone;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn add_doc(db: &Database, path: &str) -> NodeId {
        let attrs = FileAttrs {
            size: 1,
            mtime: None,
            checksum: path.to_string(),
            mime: None,
            extra: serde_json::json!({}),
        };
        node_repo::upsert_document(db, path, None, &attrs, None, t0())
            .unwrap()
            .node_id
    }

    #[test]
    fn test_status_counts_empty() {
        let db = test_db();
        let counts = status_counts(&db).unwrap();
        assert_eq!(counts, StatusCounts::default());
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn test_status_counts() {
        let db = test_db();
        let a = add_doc(&db, "a.pdf");
        let b = add_doc(&db, "b.pdf");
        let c = add_doc(&db, "c.pdf");
        add_doc(&db, "d.pdf");
        record_repo::claim(&db, a, t0()).unwrap();
        record_repo::claim(&db, b, t0()).unwrap();
        record_repo::report_failure(&db, b, "x", t0()).unwrap();
        record_repo::claim(&db, c, t0()).unwrap();
        record_repo::report_success(&db, c, &record_repo::SuccessReport::new("o", None), t0())
            .unwrap();

        let counts = status_counts(&db).unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.finished(), 2);
        assert_eq!(counts.active(), 2);
        assert_eq!(counts.get(OcrStatus::Done), 1);
    }

    #[test]
    fn test_count_stuck() {
        let db = test_db();
        let a = add_doc(&db, "a.pdf");
        let b = add_doc(&db, "b.pdf");
        record_repo::claim(&db, a, t0()).unwrap();
        record_repo::claim(&db, b, t0() + Duration::minutes(20)).unwrap();

        let now = t0() + Duration::minutes(45);
        assert_eq!(count_stuck(&db, Duration::minutes(30), now).unwrap(), 1);
        assert_eq!(count_stuck(&db, Duration::minutes(10), now).unwrap(), 2);
    }

    #[test]
    fn test_sample_paths_and_recent_failures() {
        let db = test_db();
        for p in ["c.pdf", "a.pdf", "b.pdf"] {
            add_doc(&db, p);
        }
        assert_eq!(
            sample_paths(&db, OcrStatus::Pending, 2).unwrap(),
            vec!["a.pdf", "b.pdf"]
        );

        let f1 = add_doc(&db, "f1.pdf");
        let f2 = add_doc(&db, "f2.pdf");
        record_repo::claim(&db, f1, t0()).unwrap();
        record_repo::report_failure(&db, f1, "first", t0()).unwrap();
        record_repo::claim(&db, f2, t0()).unwrap();
        record_repo::report_failure(&db, f2, "second", t0() + Duration::minutes(1)).unwrap();

        let failures = recent_failures(&db, 10).unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].path, "f2.pdf");
        assert_eq!(failures[0].last_error.as_deref(), Some("second"));
        assert_eq!(failures[1].node_id, f1);
    }
}
