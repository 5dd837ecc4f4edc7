//! Progress polling with throughput and ETA estimates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::db::stats_repo::{self, StatusCounts};
use crate::db::{Database, DatabaseError};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub counts: StatusCounts,
    pub total: u64,
    /// Share of records in `done`, 0 to 100.
    pub percent: f64,
    /// Documents finished per hour since the previous poll.
    pub instant_rate_per_hour: f64,
    /// Documents finished per hour since monitoring started.
    pub average_rate_per_hour: f64,
    /// Time left for the pending and processing records at the average
    /// rate. `None` until something has finished.
    pub eta: Option<Duration>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// No record is pending or processing.
    Completed,
    Interrupted,
}

/// Tracks successive status counts to derive processing rates.
pub struct Monitor {
    db: Database,
    started: Instant,
    baseline_done: Option<u64>,
    last: Option<(Instant, u64)>,
}

impl Monitor {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            started: Instant::now(),
            baseline_done: None,
            last: None,
        }
    }

    pub fn poll(&mut self) -> Result<ProgressSnapshot, DatabaseError> {
        let counts = stats_repo::status_counts(&self.db)?;
        Ok(self.observe(counts, Instant::now()))
    }

    fn observe(&mut self, counts: StatusCounts, at: Instant) -> ProgressSnapshot {
        let baseline = *self.baseline_done.get_or_insert(counts.done);
        let elapsed = at.saturating_duration_since(self.started);

        let instant_rate_per_hour = match self.last {
            Some((prev_at, prev_done)) => {
                per_hour(counts.done.saturating_sub(prev_done), at.saturating_duration_since(prev_at))
            }
            None => 0.0,
        };
        self.last = Some((at, counts.done));

        let average_rate_per_hour = per_hour(counts.done.saturating_sub(baseline), elapsed);
        let eta = (average_rate_per_hour > 0.0).then(|| {
            Duration::from_secs_f64(counts.active() as f64 / average_rate_per_hour * 3600.0)
        });

        let total = counts.total();
        let percent = if total == 0 {
            0.0
        } else {
            counts.done as f64 / total as f64 * 100.0
        };

        ProgressSnapshot {
            counts,
            total,
            percent,
            instant_rate_per_hour,
            average_rate_per_hour,
            eta,
            elapsed,
        }
    }

    /// Polls every `interval` and hands each snapshot to `on_tick`, until
    /// no record is left to process or `shutdown` is raised.
    pub fn run<F>(
        &mut self,
        interval: Duration,
        shutdown: &AtomicBool,
        mut on_tick: F,
    ) -> Result<MonitorExit, DatabaseError>
    where
        F: FnMut(&ProgressSnapshot),
    {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return Ok(MonitorExit::Interrupted);
            }
            let snapshot = self.poll()?;
            on_tick(&snapshot);
            if snapshot.counts.active() == 0 {
                log::info!("No pending or processing records left");
                return Ok(MonitorExit::Completed);
            }

            let wake = Instant::now() + interval;
            while Instant::now() < wake {
                if shutdown.load(Ordering::Relaxed) {
                    return Ok(MonitorExit::Interrupted);
                }
                thread::sleep(SLEEP_SLICE.min(wake.saturating_duration_since(Instant::now())));
            }
        }
    }
}

fn per_hour(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        count as f64 / secs * 3600.0
    }
}

/// Formats a duration as `HH:MM:SS`.
pub fn format_hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: u64, processing: u64, done: u64, failed: u64) -> StatusCounts {
        StatusCounts {
            pending,
            processing,
            done,
            failed,
        }
    }

    #[test]
    fn test_rates_and_eta() {
        let db = Database::open_in_memory().unwrap();
        let mut monitor = Monitor::new(db);
        let start = monitor.started;

        let first = monitor.observe(counts(100, 0, 10, 0), start);
        assert_eq!(first.total, 110);
        assert_eq!(first.instant_rate_per_hour, 0.0);
        assert_eq!(first.eta, None);

        let second = monitor.observe(counts(80, 0, 30, 0), start + Duration::from_secs(3600));
        assert!((second.instant_rate_per_hour - 20.0).abs() < 1e-9);
        assert!((second.average_rate_per_hour - 20.0).abs() < 1e-9);
        assert_eq!(second.eta, Some(Duration::from_secs(4 * 3600)));

        let third = monitor.observe(counts(70, 0, 40, 0), start + Duration::from_secs(5400));
        assert!((third.instant_rate_per_hour - 20.0).abs() < 1e-9);
        assert!((third.percent - 40.0 / 110.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_catalog_completes() {
        let db = Database::open_in_memory().unwrap();
        let shutdown = AtomicBool::new(false);
        let mut ticks = 0;
        let exit = Monitor::new(db)
            .run(Duration::from_secs(60), &shutdown, |s| {
                ticks += 1;
                assert_eq!(s.percent, 0.0);
            })
            .unwrap();
        assert_eq!(exit, MonitorExit::Completed);
        assert_eq!(ticks, 1);
    }

    #[test]
    fn test_shutdown_interrupts() {
        let db = Database::open_in_memory().unwrap();
        let shutdown = AtomicBool::new(true);
        let exit = Monitor::new(db)
            .run(Duration::from_secs(60), &shutdown, |_| {})
            .unwrap();
        assert_eq!(exit, MonitorExit::Interrupted);
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_hms(Duration::ZERO), "00:00:00");
    }
}
