//! One-shot catalog status report.

use std::fmt;

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::db::stats_repo::{self, FailureRow, StatusCounts};
use crate::db::{Database, DatabaseError, OcrStatus};
use crate::sanitize::truncate_chars;

pub const SAMPLE_SIZE: usize = 5;
pub const FAILURE_SAMPLE_SIZE: usize = 10;

/// Errors are shortened to this many characters in the report.
const REPORT_ERROR_CHARS: usize = 120;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub counts: StatusCounts,
    pub stuck: u64,
    pub stuck_minutes: i64,
    pub sample_pending: Vec<String>,
    pub recent_failures: Vec<FailureRow>,
}

impl StatusReport {
    pub fn collect(db: &Database, stuck_threshold: Duration) -> Result<Self, DatabaseError> {
        let counts = stats_repo::status_counts(db)?;
        let stuck = stats_repo::count_stuck(db, stuck_threshold, Utc::now())?;
        let sample_pending = stats_repo::sample_paths(db, OcrStatus::Pending, SAMPLE_SIZE)?;
        let recent_failures = stats_repo::recent_failures(db, FAILURE_SAMPLE_SIZE)?
            .into_iter()
            .map(|mut row| {
                row.last_error = row
                    .last_error
                    .map(|e| truncate_chars(&e, REPORT_ERROR_CHARS).to_string());
                row
            })
            .collect();

        Ok(Self {
            counts,
            stuck,
            stuck_minutes: stuck_threshold.num_minutes(),
            sample_pending,
            recent_failures,
        })
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== OCR catalog status ===")?;
        for status in OcrStatus::ALL {
            writeln!(f, "{:<12} {}", status.as_str(), self.counts.get(status))?;
        }
        writeln!(f, "{:<12} {}", "total", self.counts.total())?;
        writeln!(
            f,
            "\nStuck (processing > {} min): {}",
            self.stuck_minutes, self.stuck
        )?;

        if !self.sample_pending.is_empty() {
            writeln!(f, "\nPending examples:")?;
            for path in &self.sample_pending {
                writeln!(f, "  - {}", path)?;
            }
        }
        if !self.recent_failures.is_empty() {
            writeln!(f, "\nRecent failures:")?;
            for row in &self.recent_failures {
                writeln!(
                    f,
                    "  - {}: {}",
                    row.path,
                    row.last_error.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}
