//! OCR lifecycle state machine for `pdf_metadata` records.
//!
//! Every status write in the catalog goes through a [`Transition`], which
//! names the states it may start from and the single state it ends in.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

use super::DatabaseError;

/// Processing status of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl OcrStatus {
    pub const ALL: [OcrStatus; 4] = [
        OcrStatus::Pending,
        OcrStatus::Processing,
        OcrStatus::Done,
        OcrStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OcrStatus::Pending => "pending",
            OcrStatus::Processing => "processing",
            OcrStatus::Done => "done",
            OcrStatus::Failed => "failed",
        }
    }

    /// Whether work on this record is still outstanding.
    pub fn is_active(self) -> bool {
        matches!(self, OcrStatus::Pending | OcrStatus::Processing)
    }
}

impl fmt::Display for OcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OcrStatus::Pending),
            "processing" => Ok(OcrStatus::Processing),
            "done" => Ok(OcrStatus::Done),
            "failed" => Ok(OcrStatus::Failed),
            other => Err(DatabaseError::UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql for OcrStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for OcrStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: DatabaseError| FromSqlError::Other(Box::new(e)))
    }
}

/// A named, legal change of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A worker takes a pending record.
    Claim,
    /// OCR (and optional extraction) finished.
    Succeed,
    /// The attempt errored, timed out or crashed.
    Fail,
    /// Operator retry of failed records.
    RetryFailed,
    /// Operator release of records stuck in processing.
    FreeStuck,
    /// The scanner saw new content for an existing document.
    ContentChanged,
}

impl Transition {
    /// States this transition may start from.
    pub fn sources(self) -> &'static [OcrStatus] {
        match self {
            Transition::Claim => &[OcrStatus::Pending],
            Transition::Succeed | Transition::Fail | Transition::FreeStuck => {
                &[OcrStatus::Processing]
            }
            Transition::RetryFailed => &[OcrStatus::Failed],
            Transition::ContentChanged => &OcrStatus::ALL,
        }
    }

    pub fn target(self) -> OcrStatus {
        match self {
            Transition::Claim => OcrStatus::Processing,
            Transition::Succeed => OcrStatus::Done,
            Transition::Fail => OcrStatus::Failed,
            Transition::RetryFailed | Transition::FreeStuck | Transition::ContentChanged => {
                OcrStatus::Pending
            }
        }
    }

    pub fn allows(self, from: OcrStatus) -> bool {
        self.sources().contains(&from)
    }

    /// SQL predicate restricting `ocr_status` to this transition's sources.
    pub(crate) fn source_predicate(self) -> String {
        let list = self
            .sources()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ocr_status IN ({})", list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in OcrStatus::ALL {
            assert_eq!(status.as_str().parse::<OcrStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = "queued".parse::<OcrStatus>().unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownStatus(s) if s == "queued"));
    }

    #[test]
    fn test_claim_only_from_pending() {
        assert!(Transition::Claim.allows(OcrStatus::Pending));
        assert!(!Transition::Claim.allows(OcrStatus::Processing));
        assert!(!Transition::Claim.allows(OcrStatus::Done));
        assert!(!Transition::Claim.allows(OcrStatus::Failed));
    }

    #[test]
    fn test_done_is_terminal_for_normal_transitions() {
        for t in [
            Transition::Claim,
            Transition::Succeed,
            Transition::Fail,
            Transition::RetryFailed,
            Transition::FreeStuck,
        ] {
            assert!(!t.allows(OcrStatus::Done), "{:?} should not leave done", t);
        }
        assert!(Transition::ContentChanged.allows(OcrStatus::Done));
    }

    #[test]
    fn test_targets() {
        assert_eq!(Transition::Claim.target(), OcrStatus::Processing);
        assert_eq!(Transition::Succeed.target(), OcrStatus::Done);
        assert_eq!(Transition::Fail.target(), OcrStatus::Failed);
        assert_eq!(Transition::RetryFailed.target(), OcrStatus::Pending);
        assert_eq!(Transition::FreeStuck.target(), OcrStatus::Pending);
    }

    #[test]
    fn test_source_predicate() {
        assert_eq!(
            Transition::Succeed.source_predicate(),
            "ocr_status IN ('processing')"
        );
        assert_eq!(
            Transition::ContentChanged.source_predicate(),
            "ocr_status IN ('pending', 'processing', 'done', 'failed')"
        );
    }
}
