//! Execution units
//!
//! Each worker is a dedicated OS thread that owns its own `ReaderCache` and
//! runs one task at a time. Lines are pushed into the task's bounded channel
//! with `blocking_send`, so a full channel parks the thread and stops the
//! scan. The thread reports its exit (clean or panicking) through a drop
//! guard so the pool can replace it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use crate::storage::{LogReader, RangeParams, RangeQuery, ReaderCache, StorageResult};

use super::pool::PoolMsg;
use super::task::{StreamEvent, TaskId, WorkerId};

/// Produces the lines of one task
///
/// `emit` returns false once the consumer is gone or the task was
/// cancelled; implementations must stop producing when that happens.
pub trait TaskRunner: Send + Sync + 'static {
    fn run(
        &self,
        cache: &mut ReaderCache<LogReader>,
        params: &RangeParams,
        emit: &mut dyn FnMut(String) -> bool,
    ) -> StorageResult<()>;
}

/// The production runner: a range query over the worker's reader cache
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeRunner;

impl TaskRunner for RangeRunner {
    fn run(
        &self,
        cache: &mut ReaderCache<LogReader>,
        params: &RangeParams,
        emit: &mut dyn FnMut(String) -> bool,
    ) -> StorageResult<()> {
        let mut query = RangeQuery::new(cache, params);
        for line in query.by_ref() {
            if !emit(line?) {
                break;
            }
        }

        let stats = query.stats();
        tracing::debug!(
            topic = %params.topic,
            files_scanned = stats.files_scanned,
            files_skipped = stats.files_skipped,
            chunks_scanned = stats.chunks_scanned,
            chunks_skipped = stats.chunks_skipped,
            lines = stats.lines_emitted,
            "Range scan finished"
        );
        Ok(())
    }
}

/// Work handed to a worker thread
pub(crate) struct Assignment {
    pub task: TaskId,
    pub params: RangeParams,
    pub lines: mpsc::Sender<StreamEvent>,
    pub cancel: Arc<AtomicBool>,
    /// Raised once the runner has returned; the worker is about to report
    pub settled: Arc<AtomicBool>,
}

/// How a task ended, from the worker's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Failed(String),
    /// Consumer went away or the pool cancelled the task
    Cancelled,
}

/// Pool-side handle of a live worker thread
pub(crate) struct WorkerHandle {
    pub id: WorkerId,
    pub commands: std_mpsc::Sender<Assignment>,
    pub thread: JoinHandle<()>,
}

struct ExitGuard {
    worker: WorkerId,
    events: mpsc::UnboundedSender<PoolMsg>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let panicked = std::thread::panicking();
        if panicked {
            tracing::error!(worker = self.worker, "Worker thread panicked");
        }
        let _ = self.events.send(PoolMsg::Exited {
            worker: self.worker,
            panicked,
        });
    }
}

/// Spawn a worker thread
pub(crate) fn spawn_worker(
    id: WorkerId,
    runner: Arc<dyn TaskRunner>,
    cache_capacity: usize,
    events: mpsc::UnboundedSender<PoolMsg>,
) -> std::io::Result<WorkerHandle> {
    let (commands, inbox) = std_mpsc::channel::<Assignment>();

    let thread = std::thread::Builder::new()
        .name(format!("range-worker-{}", id))
        .spawn(move || {
            let _guard = ExitGuard {
                worker: id,
                events: events.clone(),
            };
            let mut cache = ReaderCache::new(cache_capacity);

            while let Ok(assignment) = inbox.recv() {
                let task = assignment.task;
                let outcome = run_assignment(id, runner.as_ref(), &mut cache, assignment, &events);
                let _ = events.send(PoolMsg::Finished {
                    worker: id,
                    task,
                    outcome,
                });
            }

            cache.close_all();
            tracing::debug!(worker = id, "Worker thread stopped");
        })?;

    Ok(WorkerHandle {
        id,
        commands,
        thread,
    })
}

fn run_assignment(
    worker: WorkerId,
    runner: &dyn TaskRunner,
    cache: &mut ReaderCache<LogReader>,
    assignment: Assignment,
    events: &mpsc::UnboundedSender<PoolMsg>,
) -> TaskOutcome {
    let Assignment {
        task,
        params,
        lines,
        cancel,
        settled,
    } = assignment;

    let _ = events.send(PoolMsg::Accepted { worker, task });

    let mut consumer_gone = false;
    let result = runner.run(cache, &params, &mut |line| {
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        if lines.blocking_send(StreamEvent::Line(line)).is_err() {
            consumer_gone = true;
            return false;
        }
        true
    });
    settled.store(true, Ordering::Release);

    if consumer_gone || cancel.load(Ordering::Acquire) {
        return TaskOutcome::Cancelled;
    }

    // Completed only once `Done` is in the caller's channel
    match result {
        Ok(()) => match lines.blocking_send(StreamEvent::Done) {
            Ok(()) => TaskOutcome::Completed,
            Err(_) => TaskOutcome::Cancelled,
        },
        Err(e) => {
            let message = e.to_string();
            let _ = lines.blocking_send(StreamEvent::Failed(message.clone()));
            TaskOutcome::Failed(message)
        }
    }
}
