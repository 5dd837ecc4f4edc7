//! End-to-end scenarios over a real catalog and document root, with the
//! external tools replaced by fakes.

mod common;

use std::sync::Arc;

use chrono::Utc;

use common::{FakeExtractor, FakeOcr, OcrBehavior, RecordingSink, TestHarness};
use ocrbatch::db::record_repo::{self, MAX_ERROR_CHARS};
use ocrbatch::db::{node_repo, stats_repo, DatabaseError};
use ocrbatch::worker::UnitHandler;
use ocrbatch::{
    recovery, AttemptOutcome, DispatchReport, Dispatcher, OcrStatus, RetryPolicy, WorkerError,
    WorkerPool,
};

#[test]
fn scenario_a_rescan_is_idempotent() {
    let h = TestHarness::new();
    h.write_pdf("a.pdf", 2);
    h.write_pdf("x/b.pdf", 1);
    h.write_pdf("x/y/c.pdf", 3);

    let first = h.scan();
    assert_eq!(first.created, 3);
    assert_eq!(node_repo::count(&h.db).unwrap(), 5); // 3 files + 2 directories
    assert_eq!(stats_repo::status_counts(&h.db).unwrap().pending, 3);
    assert_eq!(h.record("x/y/c.pdf").pages, Some(3));

    let before: Vec<_> = ["a.pdf", "x/b.pdf", "x/y/c.pdf"]
        .iter()
        .map(|p| h.record(p))
        .collect();

    let second = h.scan();
    assert_eq!(second.created, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(node_repo::count(&h.db).unwrap(), 5);
    for (rel, old) in ["a.pdf", "x/b.pdf", "x/y/c.pdf"].iter().zip(before) {
        let now = h.record(rel);
        assert_eq!(now.status, OcrStatus::Pending);
        assert_eq!(now.updated_at, old.updated_at);
    }
}

#[test]
fn rescan_leaves_finished_records_alone_unless_content_changed() {
    let h = TestHarness::new();
    h.write_file("done.pdf", b"one");
    h.write_file("failed.pdf", b"two");
    h.scan();

    let done = h.node_id("done.pdf");
    let failed = h.node_id("failed.pdf");
    record_repo::claim(&h.db, done, Utc::now()).unwrap();
    record_repo::report_success(
        &h.db,
        done,
        &record_repo::SuccessReport::new("/out/done.pdf", Some("text".into())),
        Utc::now(),
    )
    .unwrap();
    record_repo::claim(&h.db, failed, Utc::now()).unwrap();
    record_repo::report_failure(&h.db, failed, "boom", Utc::now()).unwrap();

    h.scan();
    assert_eq!(h.record("done.pdf").status, OcrStatus::Done);
    assert_eq!(h.record("failed.pdf").status, OcrStatus::Failed);

    h.write_file("done.pdf", b"one, edited");
    h.write_file("failed.pdf", b"two, edited");
    let report = h.scan();
    assert_eq!(report.changed, 2);

    let record = h.record("done.pdf");
    assert_eq!(record.status, OcrStatus::Pending);
    assert_eq!(record.ocr_pdf_path, None);
    assert_eq!(record.ocr_text, None);
    let record = h.record("failed.pdf");
    assert_eq!(record.status, OcrStatus::Pending);
    assert_eq!(record.last_error, None);
}

#[test]
fn content_change_resets_record_being_processed() {
    let h = TestHarness::new();
    h.write_file("a.pdf", b"original");
    h.scan();
    let node = h.node_id("a.pdf");
    assert!(record_repo::claim(&h.db, node, Utc::now()).unwrap());

    h.write_file("a.pdf", b"original, replaced mid-run");
    assert_eq!(h.scan().changed, 1);

    let record = h.record("a.pdf");
    assert_eq!(record.status, OcrStatus::Pending);
    assert_eq!(record.ocr_started_at, None);

    // The attempt that held the old content can no longer report.
    let late = record_repo::report_success(
        &h.db,
        node,
        &record_repo::SuccessReport::new("/out/a.pdf", Some("stale".into())),
        Utc::now(),
    );
    assert!(matches!(
        late,
        Err(DatabaseError::InvalidTransition {
            from: OcrStatus::Pending,
            ..
        })
    ));
    assert_eq!(h.record("a.pdf").ocr_text, None);
}

#[test]
fn scenario_b_dispatch_skips_missing_file() {
    let h = TestHarness::new();
    h.write_pdf("keep.pdf", 1);
    h.write_pdf("gone.pdf", 1);
    h.scan();
    h.remove_file("gone.pdf");

    let ocr = Arc::new(FakeOcr::new(OcrBehavior::Copy));
    let executor = h.executor(ocr.clone(), Arc::new(FakeExtractor::text("hola")));
    let pool = WorkerPool::new(Arc::new(executor), 2, 4, RetryPolicy::none()).unwrap();

    let report = Dispatcher::new(h.db.clone(), &h.root)
        .run(&pool, None)
        .unwrap();
    let tasks = pool.wait();

    assert_eq!(
        report,
        DispatchReport {
            selected: 2,
            enqueued: 1,
            skipped: 1
        }
    );
    assert_eq!(tasks.len(), 1);
    assert_eq!(ocr.calls(), 1);

    let gone = h.record("gone.pdf");
    assert_eq!(gone.status, OcrStatus::Pending);
    assert_eq!(gone.ocr_started_at, None);
    assert_eq!(h.record("keep.pdf").status, OcrStatus::Done);
}

#[test]
fn scenario_c_ocr_failure_records_bounded_error() {
    let h = TestHarness::new();
    h.write_pdf("a.pdf", 1);
    h.scan();

    let diagnostic = format!("PriorOcrFoundError: {}", "x".repeat(2000));
    let executor = h.executor(
        Arc::new(FakeOcr::new(OcrBehavior::Fail(diagnostic))),
        Arc::new(FakeExtractor::text("never")),
    );
    let outcome = executor.execute(&h.unit("a.pdf")).unwrap();
    assert!(matches!(outcome, AttemptOutcome::Failed { .. }));

    let record = h.record("a.pdf");
    assert_eq!(record.status, OcrStatus::Failed);
    let error = record.last_error.unwrap();
    assert!(error.starts_with("ocrmypdf error: PriorOcrFoundError"));
    assert_eq!(error.chars().count(), MAX_ERROR_CHARS);
    assert_eq!(record.ocr_pdf_path, None);
    assert!(record.ocr_finished_at.is_some());
}

#[test]
fn scenario_d_extraction_failure_still_done() {
    let h = TestHarness::new();
    h.write_pdf("dir/a.pdf", 1);
    h.scan();

    let executor = h.executor(
        Arc::new(FakeOcr::new(OcrBehavior::Copy)),
        Arc::new(FakeExtractor::failing()),
    );
    let outcome = executor.execute(&h.unit("dir/a.pdf")).unwrap();
    let expected_output = h.output_root().join("dir/a.pdf");
    assert_eq!(
        outcome,
        AttemptOutcome::Done {
            output_path: expected_output.clone(),
            text_len: None,
            indexed: false,
        }
    );
    assert!(expected_output.is_file());

    let record = h.record("dir/a.pdf");
    assert_eq!(record.status, OcrStatus::Done);
    assert_eq!(
        record.ocr_pdf_path.as_deref(),
        Some(&*expected_output.to_string_lossy())
    );
    assert_eq!(record.ocr_text, None);
    assert_eq!(record.snippet, None);
    assert!(!record.text_found);
}

#[test]
fn scenario_e_retry_failed_resets_only_failed() {
    let h = TestHarness::new();
    for i in 0..8 {
        h.write_file(&format!("{i}.pdf"), format!("doc {i}").as_bytes());
    }
    h.scan();

    let ids: Vec<i64> = (0..8).map(|i| h.node_id(&format!("{i}.pdf"))).collect();
    for id in &ids {
        record_repo::claim(&h.db, *id, Utc::now()).unwrap();
    }
    for id in &ids[..5] {
        record_repo::report_failure(&h.db, *id, "ocrmypdf error: boom", Utc::now()).unwrap();
    }
    record_repo::report_success(
        &h.db,
        ids[5],
        &record_repo::SuccessReport::new("/out/5.pdf", None),
        Utc::now(),
    )
    .unwrap();

    assert_eq!(recovery::retry_failed(&h.db).unwrap(), 5);

    for i in 0..5 {
        let record = h.record(&format!("{i}.pdf"));
        assert_eq!(record.status, OcrStatus::Pending);
        assert_eq!(record.last_error, None);
    }
    assert_eq!(h.record("5.pdf").status, OcrStatus::Done);
    assert_eq!(h.record("6.pdf").status, OcrStatus::Processing);
    assert_eq!(h.record("7.pdf").status, OcrStatus::Processing);
}

#[test]
fn successful_run_indexes_text_and_mirrors_tree() {
    let h = TestHarness::new();
    h.write_pdf("a/one.pdf", 1);
    h.write_pdf("a/b/two.pdf", 1);
    h.write_pdf("three.pdf", 1);
    h.scan();

    let sink = Arc::new(RecordingSink::default());
    let executor = h
        .executor(
            Arc::new(FakeOcr::new(OcrBehavior::Copy)),
            Arc::new(FakeExtractor::text("  texto reconocido  ")),
        )
        .with_sink(sink.clone());
    let pool = WorkerPool::new(Arc::new(executor), 3, 2, RetryPolicy::none()).unwrap();
    Dispatcher::new(h.db.clone(), &h.root).run(&pool, None).unwrap();
    let tasks = pool.wait();

    assert_eq!(tasks.len(), 3);
    assert!(tasks
        .iter()
        .all(|t| matches!(&t.result, Ok(AttemptOutcome::Done { indexed: true, .. }))));
    for rel in ["a/one.pdf", "a/b/two.pdf", "three.pdf"] {
        assert!(h.output_root().join(rel).is_file());
        let record = h.record(rel);
        assert_eq!(record.status, OcrStatus::Done);
        assert!(record.text_found);
        assert_eq!(record.snippet.as_deref(), Some("  texto reconocido  "));
    }

    let mut paths: Vec<String> = sink.docs.lock().unwrap().iter().map(|d| d.1.clone()).collect();
    paths.sort();
    assert_eq!(paths, vec!["a/b/two.pdf", "a/one.pdf", "three.pdf"]);
}

#[test]
fn sink_failure_keeps_done() {
    let h = TestHarness::new();
    h.write_pdf("a.pdf", 1);
    h.scan();

    let sink = Arc::new(RecordingSink {
        reject: true,
        ..Default::default()
    });
    let executor = h
        .executor(
            Arc::new(FakeOcr::new(OcrBehavior::Copy)),
            Arc::new(FakeExtractor::text("hola")),
        )
        .with_sink(sink);
    let outcome = executor.execute(&h.unit("a.pdf")).unwrap();
    assert!(matches!(outcome, AttemptOutcome::Done { indexed: false, .. }));
    assert_eq!(h.record("a.pdf").status, OcrStatus::Done);
}

#[test]
fn timeout_records_timeout_message() {
    let h = TestHarness::new();
    h.write_pdf("slow.pdf", 1);
    h.scan();

    let executor = h.executor(
        Arc::new(FakeOcr::new(OcrBehavior::Timeout)),
        Arc::new(FakeExtractor::text("never")),
    );
    let outcome = executor.execute(&h.unit("slow.pdf")).unwrap();
    assert_eq!(
        outcome,
        AttemptOutcome::Failed {
            error: "Timeout processing PDF (>5s)".to_string()
        }
    );
    assert_eq!(
        h.record("slow.pdf").last_error.as_deref(),
        Some("Timeout processing PDF (>5s)")
    );
}

#[test]
fn missing_ocr_tool_is_a_recorded_failure() {
    let h = TestHarness::new();
    h.write_pdf("a.pdf", 1);
    h.scan();

    let executor = h.executor(
        Arc::new(FakeOcr::new(OcrBehavior::Missing)),
        Arc::new(FakeExtractor::text("never")),
    );
    assert!(matches!(
        executor.execute(&h.unit("a.pdf")).unwrap(),
        AttemptOutcome::Failed { .. }
    ));
    let error = h.record("a.pdf").last_error.unwrap();
    assert!(error.contains("ocrmypdf"));
}

#[test]
fn unexpected_error_is_recorded_and_reported_without_retry() {
    let h = TestHarness::new();
    h.write_pdf("a.pdf", 1);
    h.scan();

    let ocr = Arc::new(FakeOcr::new(OcrBehavior::Panic));
    let executor = h.executor(ocr.clone(), Arc::new(FakeExtractor::text("never")));
    let pool = WorkerPool::new(
        Arc::new(executor),
        1,
        1,
        RetryPolicy::new(2, std::time::Duration::from_secs(60)),
    )
    .unwrap();
    let started = std::time::Instant::now();
    pool.submit(h.unit("a.pdf")).unwrap();
    let tasks = pool.wait();

    // The record is already failed, so no retry sleeps out its backoff.
    assert!(started.elapsed() < std::time::Duration::from_secs(30));
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].attempts, 1);
    assert!(matches!(
        &tasks[0].result,
        Err(WorkerError::Panicked(message)) if message == "ocr tool crashed"
    ));
    assert_eq!(ocr.calls(), 1);

    let record = h.record("a.pdf");
    assert_eq!(record.status, OcrStatus::Failed);
    assert_eq!(
        record.last_error.as_deref(),
        Some("Unexpected error: ocr tool crashed")
    );
}

#[test]
fn retry_is_allowed_only_while_pending() {
    let h = TestHarness::new();
    h.write_pdf("a.pdf", 1);
    h.scan();

    let executor = h.executor(
        Arc::new(FakeOcr::new(OcrBehavior::Copy)),
        Arc::new(FakeExtractor::text("hola")),
    );
    let unit = h.unit("a.pdf");
    let error = WorkerError::SourceMissing(unit.path.clone());
    assert!(executor.should_retry(&unit, &error));

    executor.execute(&unit).unwrap();
    assert!(!executor.should_retry(&unit, &error));
}

#[test]
fn source_removed_after_dispatch_fails_attempt() {
    let h = TestHarness::new();
    h.write_pdf("a.pdf", 1);
    h.scan();
    let unit = h.unit("a.pdf");
    h.remove_file("a.pdf");

    let executor = h.executor(
        Arc::new(FakeOcr::new(OcrBehavior::Copy)),
        Arc::new(FakeExtractor::text("never")),
    );
    assert!(matches!(
        executor.execute(&unit),
        Err(WorkerError::SourceMissing(_))
    ));
    let record = h.record("a.pdf");
    assert_eq!(record.status, OcrStatus::Failed);
    assert!(record
        .last_error
        .unwrap()
        .starts_with("Unexpected error: Source document not found"));
}

#[test]
fn claimed_record_is_not_processed_twice() {
    let h = TestHarness::new();
    h.write_pdf("a.pdf", 1);
    h.scan();
    let ocr = Arc::new(FakeOcr::new(OcrBehavior::Copy));
    let executor = h.executor(ocr.clone(), Arc::new(FakeExtractor::text("t")));

    let unit = h.unit("a.pdf");
    assert!(executor.execute(&unit).unwrap().is_done());
    assert_eq!(
        executor.execute(&unit).unwrap(),
        AttemptOutcome::ClaimRejected
    );
    assert_eq!(ocr.calls(), 1);
}
