//! Operator recovery: requeue failed records and free stuck ones.

use chrono::{Duration, Utc};
use log::info;

use crate::db::record_repo;
use crate::db::stats_repo;
use crate::db::{Database, DatabaseError};

/// Moves every `failed` record back to `pending`. Returns how many moved.
pub fn retry_failed(db: &Database) -> Result<usize, DatabaseError> {
    let before = stats_repo::status_counts(db)?;
    info!("Failed records before reset: {}", before.failed);

    let moved = record_repo::reset_failed_to_pending(db, Utc::now())?;

    let after = stats_repo::status_counts(db)?;
    info!(
        "Reset {} failed records to pending (failed: {}, pending: {})",
        moved, after.failed, after.pending
    );
    Ok(moved)
}

/// Moves `processing` records started more than `threshold` ago back to
/// `pending`. Returns how many moved.
pub fn free_stuck(db: &Database, threshold: Duration) -> Result<usize, DatabaseError> {
    let now = Utc::now();
    let stuck = stats_repo::count_stuck(db, threshold, now)?;
    info!(
        "Processing records older than {} minutes: {}",
        threshold.num_minutes(),
        stuck
    );

    let moved = record_repo::reset_stuck_to_pending(db, threshold, now)?;

    let after = stats_repo::status_counts(db)?;
    info!(
        "Freed {} stuck records (processing: {}, pending: {})",
        moved, after.processing, after.pending
    );
    Ok(moved)
}
