//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use log::{error, info, warn};

use ocrbatch::config::validate_settings;
use ocrbatch::db::node_repo;
use ocrbatch::monitor::format_hms;
use ocrbatch::{
    recovery, AttemptOutcome, Database, Dispatcher, Monitor, MonitorExit, OcrBatchError,
    QueueError, RetryPolicy, ScanError, ScanOptions, Scanner, Settings, StatusReport,
    TaskExecutor, TaskReport, WorkerPool,
};

fn open_database(settings: &Settings) -> Result<Database> {
    Database::open(&settings.database_path).with_context(|| {
        format!(
            "cannot open catalog at {}",
            settings.database_path.display()
        )
    })
}

/// The root from the flag, else from the environment. It must be an
/// existing directory.
fn resolve_root(settings: &Settings, flag: Option<PathBuf>) -> Result<PathBuf> {
    let Some(root) = flag.or_else(|| settings.root.clone()) else {
        bail!("no document root given; pass --root or set OCRBATCH_ROOT");
    };
    if !root.is_dir() {
        return Err(ScanError::RootMissing(root).into());
    }
    Ok(root.canonicalize().unwrap_or(root))
}

/// Raises the returned flag on Ctrl-C.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        warn!("Interrupt received, finishing current work...");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("cannot install Ctrl-C handler")?;
    Ok(flag)
}

pub fn scan(
    settings: Settings,
    root: Option<PathBuf>,
    limit: Option<usize>,
    reindex: bool,
) -> Result<()> {
    let root = resolve_root(&settings, root)?;
    let db = open_database(&settings)?;
    let report = Scanner::new(db, &root)
        .with_options(ScanOptions { limit, reindex })
        .scan()?;
    println!(
        "Processed: {} (new {}, changed {}, unchanged {}, failed {})",
        report.processed(),
        report.created,
        report.changed,
        report.unchanged,
        report.failed
    );
    Ok(())
}

pub fn reindex(settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let count = node_repo::reindex(&db)?;
    println!("Reindexed {} nodes", count);
    Ok(())
}

pub fn repair_parents(settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let repaired = node_repo::repair_parent_links(&db, Utc::now())?;
    let count = node_repo::reindex(&db)?;
    println!("Repaired {} parent links, reindexed {} nodes", repaired, count);
    Ok(())
}

pub fn dispatch_run(
    mut settings: Settings,
    root: Option<PathBuf>,
    limit: Option<usize>,
    workers: Option<usize>,
) -> Result<()> {
    if let Some(workers) = workers {
        settings.workers = workers;
        settings.queue_capacity = workers.saturating_mul(2);
    }
    validate_settings(&settings)?;

    let root = resolve_root(&settings, root)?;
    let db = open_database(&settings)?;

    let executor = TaskExecutor::from_settings(db.clone(), &settings, &root)?;
    info!(
        "Writing OCR output under {}",
        executor.layout().output_root().display()
    );
    let pool = WorkerPool::new(
        Arc::new(executor),
        settings.workers,
        settings.queue_capacity,
        RetryPolicy::from_settings(&settings.retry),
    )?;

    let shutdown = pool.shutdown_flag();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, finishing tasks in progress...");
        shutdown.store(true, Ordering::Relaxed);
    })
    .context("cannot install Ctrl-C handler")?;

    let dispatched = Dispatcher::new(db, &root).run(&pool, limit);
    let reports = pool.wait();

    match dispatched {
        Ok(report) => println!(
            "Dispatched: {} selected, {} enqueued, {} skipped (file missing)",
            report.selected, report.enqueued, report.skipped
        ),
        Err(OcrBatchError::Queue(QueueError::Closed)) => {
            warn!("Dispatch interrupted; remaining documents stay pending")
        }
        Err(e) => return Err(e.into()),
    }
    print_task_summary(&reports);
    Ok(())
}

fn print_task_summary(reports: &[TaskReport]) {
    let (mut done, mut failed, mut rejected, mut errors) = (0, 0, 0, 0);
    for report in reports {
        match &report.result {
            Ok(AttemptOutcome::Done { .. }) => done += 1,
            Ok(AttemptOutcome::Failed { .. }) => failed += 1,
            Ok(AttemptOutcome::ClaimRejected) => rejected += 1,
            Err(e) => {
                error!(
                    "Task {} for node {} gave up after {} attempts: {}",
                    report.task_id, report.node_id, report.attempts, e
                );
                errors += 1;
            }
        }
    }
    println!(
        "Tasks: {} done, {} failed, {} skipped (already claimed), {} errors",
        done, failed, rejected, errors
    );
}

pub fn retry_failed(settings: &Settings) -> Result<()> {
    let db = open_database(settings)?;
    let moved = recovery::retry_failed(&db)?;
    println!("Reset {} failed documents to pending", moved);
    Ok(())
}

pub fn free_stuck(mut settings: Settings, minutes: Option<u64>) -> Result<()> {
    if let Some(minutes) = minutes {
        settings.stuck_minutes = minutes;
        validate_settings(&settings)?;
    }
    let db = open_database(&settings)?;
    let moved = recovery::free_stuck(&db, settings.stuck_threshold())?;
    println!(
        "Freed {} documents stuck for more than {} minutes",
        moved, settings.stuck_minutes
    );
    Ok(())
}

pub fn status(settings: &Settings, json: bool) -> Result<()> {
    let db = open_database(settings)?;
    let report = StatusReport::collect(&db, settings.stuck_threshold())?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

pub fn monitor(settings: &Settings, interval_secs: u64) -> Result<()> {
    let db = open_database(settings)?;
    let shutdown = interrupt_flag()?;
    let interval = Duration::from_secs(interval_secs.max(1));

    let exit = Monitor::new(db).run(interval, &shutdown, |s| {
        let eta = s
            .eta
            .map(format_hms)
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "[{}] done {}/{} ({:.1}%) | pending {} | processing {} | failed {} | {:.0}/h now, {:.0}/h avg | elapsed {} | ETA {}",
            Utc::now().format("%H:%M:%S"),
            s.counts.done,
            s.total,
            s.percent,
            s.counts.pending,
            s.counts.processing,
            s.counts.failed,
            s.instant_rate_per_hour,
            s.average_rate_per_hour,
            format_hms(s.elapsed),
            eta
        );
    })?;

    match exit {
        MonitorExit::Completed => println!("Processing complete"),
        MonitorExit::Interrupted => println!("Monitoring stopped"),
    }
    Ok(())
}
