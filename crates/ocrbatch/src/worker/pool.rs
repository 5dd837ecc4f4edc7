use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, error, info};

use crate::dispatch::TaskQueue;
use crate::error::{QueueError, WorkerError};
use crate::worker::job::{AttemptOutcome, TaskReport, WorkUnit};
use crate::worker::retry::{run_with_retry, RetryPolicy};

const RECV_POLL: Duration = Duration::from_millis(100);
const SUBMIT_POLL: Duration = Duration::from_millis(100);

/// Runs one attempt for a unit. Implemented by the task executor.
pub trait UnitHandler: Send + Sync {
    fn handle(&self, unit: &WorkUnit) -> Result<AttemptOutcome, WorkerError>;

    /// Whether another attempt after `error` could still make progress.
    fn should_retry(&self, _unit: &WorkUnit, _error: &WorkerError) -> bool {
        true
    }
}

/// In-process task queue: a bounded channel feeding a fixed set of worker
/// threads. Each unit goes to exactly one worker and is acknowledged, by
/// sending its report, only after the handler returns.
pub struct WorkerPool {
    unit_sender: Sender<WorkUnit>,
    report_receiver: Receiver<TaskReport>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        handler: Arc<dyn UnitHandler>,
        worker_count: usize,
        queue_capacity: usize,
        retry: RetryPolicy,
    ) -> Result<Self, QueueError> {
        if worker_count == 0 {
            return Err(QueueError::SpawnFailed(
                "worker count must be greater than zero".to_string(),
            ));
        }
        let (unit_sender, unit_receiver) = bounded::<WorkUnit>(queue_capacity.max(1));
        let (report_sender, report_receiver) = unbounded::<TaskReport>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let unit_rx = unit_receiver.clone();
            let report_tx = report_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("ocr-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        unit_rx,
                        report_tx,
                        shutdown_flag,
                        worker_handler,
                        retry,
                    );
                })
                .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            unit_sender,
            report_receiver,
            workers,
            shutdown,
        })
    }

    /// Enqueues a unit, blocking while the queue is full. Fails with
    /// `QueueError::Closed` once shutdown is requested.
    pub fn submit(&self, unit: WorkUnit) -> Result<(), QueueError> {
        let mut unit = unit;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(QueueError::Closed);
            }
            match self.unit_sender.send_timeout(unit, SUBMIT_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => unit = back,
                Err(SendTimeoutError::Disconnected(_)) => return Err(QueueError::Closed),
            }
        }
    }

    pub fn recv_report(&self) -> Option<TaskReport> {
        self.report_receiver.recv().ok()
    }

    /// Stops workers after their current unit. Queued units are dropped
    /// unprocessed and stay `pending` in the catalog.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Shared flag raised by [`WorkerPool::shutdown`].
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Closes the queue, waits for the workers to drain it and returns the
    /// reports not yet received.
    pub fn wait(self) -> Vec<TaskReport> {
        drop(self.unit_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
        self.report_receiver.try_iter().collect()
    }
}

impl TaskQueue for WorkerPool {
    fn submit(&self, unit: WorkUnit) -> Result<(), QueueError> {
        WorkerPool::submit(self, unit)
    }
}

fn run_worker(
    worker_id: usize,
    unit_receiver: Receiver<WorkUnit>,
    report_sender: Sender<TaskReport>,
    shutdown: Arc<AtomicBool>,
    handler: Arc<dyn UnitHandler>,
    retry: RetryPolicy,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match unit_receiver.recv_timeout(RECV_POLL) {
            Ok(unit) => {
                debug!("Worker {} processing node {}", worker_id, unit.node_id);

                let retried = run_with_retry(
                    &retry,
                    &shutdown,
                    |_| handler.handle(&unit),
                    |e| handler.should_retry(&unit, e),
                );
                let report = TaskReport {
                    task_id: unit.task_id,
                    node_id: unit.node_id,
                    attempts: retried.attempts,
                    result: retried.result,
                };

                if let Err(e) = report_sender.send(report) {
                    error!("Worker {} failed to send report: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
