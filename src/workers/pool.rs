//! Worker pool coordinator
//!
//! All pool state (workers, idle set, FIFO queue, in-flight tasks) is owned by
//! a single coordinator task. Callers, worker threads and timers talk to it
//! through one message channel, so there is no shared mutable task registry.
//!
//! Each task gets its own bounded line channel and abort signal at dispatch
//! time. The coordinator enforces the per-task deadline and replaces workers
//! that crash, stop responding, or are still scanning when their caller hangs
//! up, so a slot is never held by a task nobody reads.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::storage::{RangeParams, DEFAULT_READER_CAPACITY};

use super::error::{PoolError, PoolResult};
use super::task::{TaskId, TaskState, TaskStream, WorkerId};
use super::worker::{spawn_worker, Assignment, RangeRunner, TaskOutcome, TaskRunner, WorkerHandle};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads
    pub size: usize,
    /// Deadline for one task, from dispatch to completion
    pub task_timeout: Duration,
    /// How long a timed-out worker gets to acknowledge before it is retired
    pub retire_grace: Duration,
    /// Readers cached per worker
    pub reader_cache_capacity: usize,
    /// Lines buffered between a worker and its caller
    pub stream_buffer: usize,
}

impl PoolConfig {
    /// Available parallelism minus one, at least one
    pub fn default_size() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .saturating_sub(1)
            .max(1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: Self::default_size(),
            task_timeout: Duration::from_millis(30_000),
            retire_grace: Duration::from_secs(1),
            reader_cache_capacity: DEFAULT_READER_CAPACITY,
            stream_buffer: 256,
        }
    }
}

/// Snapshot of pool state and lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub crashed: u64,
    pub retired: u64,
}

/// Messages handled by the coordinator
pub(crate) enum PoolMsg {
    Schedule {
        params: RangeParams,
        reply: oneshot::Sender<PoolResult<TaskStream>>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Drain {
        reply: oneshot::Sender<()>,
    },
    Accepted {
        worker: WorkerId,
        task: TaskId,
    },
    Finished {
        worker: WorkerId,
        task: TaskId,
        outcome: TaskOutcome,
    },
    Exited {
        worker: WorkerId,
        panicked: bool,
    },
    CallerClosed {
        task: TaskId,
    },
    Deadline {
        task: TaskId,
    },
    RetireCheck {
        task: TaskId,
        worker: WorkerId,
    },
}

struct QueuedTask {
    id: TaskId,
    params: RangeParams,
    reply: oneshot::Sender<PoolResult<TaskStream>>,
}

struct InFlight {
    worker: WorkerId,
    state: TaskState,
    /// Pending until the worker accepts
    reply: Option<oneshot::Sender<PoolResult<TaskStream>>>,
    stream: Option<TaskStream>,
    /// Dropped on normal completion, fired on pool-side failure
    abort: Option<oneshot::Sender<PoolError>>,
    cancel: Arc<AtomicBool>,
    /// Set by the worker once its runner has returned
    settled: Arc<AtomicBool>,
    timers: Vec<JoinHandle<()>>,
}

impl InFlight {
    /// Report a pool-side failure to the caller and stop the worker
    fn fail(&mut self, err: PoolError) {
        self.cancel.store(true, Ordering::Release);
        self.stream = None;
        match self.reply.take() {
            Some(reply) => {
                let _ = reply.send(Err(err));
            }
            None => {
                if let Some(abort) = self.abort.take() {
                    let _ = abort.send(err);
                }
            }
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        for timer in &self.timers {
            timer.abort();
        }
    }
}

struct Coordinator {
    config: PoolConfig,
    runner: Arc<dyn TaskRunner>,
    tx: mpsc::UnboundedSender<PoolMsg>,
    workers: HashMap<WorkerId, WorkerHandle>,
    idle: Vec<WorkerId>,
    queue: VecDeque<QueuedTask>,
    in_flight: HashMap<TaskId, InFlight>,
    next_task: TaskId,
    next_worker: WorkerId,
    stats: PoolStats,
    draining: bool,
    drain_waiters: Vec<oneshot::Sender<()>>,
}

impl Coordinator {
    fn new(config: PoolConfig, runner: Arc<dyn TaskRunner>, tx: mpsc::UnboundedSender<PoolMsg>) -> Self {
        Self {
            config,
            runner,
            tx,
            workers: HashMap::new(),
            idle: Vec::new(),
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            next_task: 1,
            next_worker: 1,
            stats: PoolStats::default(),
            draining: false,
            drain_waiters: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PoolMsg>) {
        while let Some(msg) = rx.recv().await {
            self.handle(msg);

            if self.draining && self.queue.is_empty() && self.in_flight.is_empty() {
                self.shutdown().await;
                break;
            }
        }
    }

    fn handle(&mut self, msg: PoolMsg) {
        match msg {
            PoolMsg::Schedule { params, reply } => self.schedule(params, reply),
            PoolMsg::Stats { reply } => {
                let _ = reply.send(self.snapshot());
            }
            PoolMsg::Drain { reply } => {
                if !self.draining {
                    tracing::info!(
                        queued = self.queue.len(),
                        in_flight = self.in_flight.len(),
                        "Draining worker pool"
                    );
                }
                self.draining = true;
                self.drain_waiters.push(reply);
            }
            PoolMsg::Accepted { worker, task } => self.on_accepted(worker, task),
            PoolMsg::Finished {
                worker,
                task,
                outcome,
            } => self.on_finished(worker, task, outcome),
            PoolMsg::Exited { worker, panicked } => self.on_exited(worker, panicked),
            PoolMsg::CallerClosed { task } => self.on_caller_closed(task),
            PoolMsg::Deadline { task } => self.on_deadline(task),
            PoolMsg::RetireCheck { task, worker } => self.on_retire_check(task, worker),
        }
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            size: self.workers.len(),
            idle: self.idle.len(),
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
            ..self.stats
        }
    }

    fn schedule(&mut self, params: RangeParams, reply: oneshot::Sender<PoolResult<TaskStream>>) {
        if self.draining {
            let _ = reply.send(Err(PoolError::ShutDown));
            return;
        }

        while self.workers.len() < self.config.size.max(1) {
            if !self.spawn_worker() {
                break;
            }
        }
        if self.workers.is_empty() {
            let _ = reply.send(Err(PoolError::Scheduling(
                "no worker threads available".to_string(),
            )));
            return;
        }

        let id = self.next_task;
        self.next_task += 1;
        tracing::debug!(task = id, topic = %params.topic, files = params.files.len(), "Task queued");

        self.queue.push_back(QueuedTask { id, params, reply });
        self.dispatch();
    }

    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(worker) = self.idle.pop() else {
                break;
            };
            let Some(task) = self.queue.pop_front() else {
                self.idle.push(worker);
                break;
            };

            if task.reply.is_closed() {
                tracing::debug!(task = task.id, "Dropping task abandoned while queued");
                self.idle.push(worker);
                continue;
            }

            self.assign(worker, task);
        }
    }

    fn assign(&mut self, worker: WorkerId, task: QueuedTask) {
        let QueuedTask { id, params, reply } = task;

        let Some(handle) = self.workers.get(&worker) else {
            self.queue.push_front(QueuedTask { id, params, reply });
            return;
        };

        let (lines_tx, lines_rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let (abort_tx, abort_rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let settled = Arc::new(AtomicBool::new(false));

        let assignment = Assignment {
            task: id,
            params,
            lines: lines_tx.clone(),
            cancel: Arc::clone(&cancel),
            settled: Arc::clone(&settled),
        };

        if let Err(std_mpsc::SendError(assignment)) = handle.commands.send(assignment) {
            // Thread is gone; its exit report will bring a replacement
            tracing::warn!(worker, task = id, "Worker unreachable, requeueing task");
            self.queue.push_front(QueuedTask {
                id,
                params: assignment.params,
                reply,
            });
            return;
        }

        let deadline = {
            let tx = self.tx.clone();
            let timeout = self.config.task_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(PoolMsg::Deadline { task: id });
            })
        };

        let watcher = {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                lines_tx.closed().await;
                let _ = tx.send(PoolMsg::CallerClosed { task: id });
            })
        };

        tracing::debug!(task = id, worker, "Task assigned");
        self.in_flight.insert(
            id,
            InFlight {
                worker,
                state: TaskState::Assigned,
                reply: Some(reply),
                stream: Some(TaskStream::new(id, lines_rx, abort_rx)),
                abort: Some(abort_tx),
                cancel,
                settled,
                timers: vec![deadline, watcher],
            },
        );
    }

    fn on_accepted(&mut self, worker: WorkerId, task: TaskId) {
        let Some(flight) = self.in_flight.get_mut(&task) else {
            return;
        };
        if flight.worker != worker || flight.state != TaskState::Assigned {
            return;
        }

        flight.state = TaskState::Accepted;
        if let (Some(reply), Some(stream)) = (flight.reply.take(), flight.stream.take()) {
            if reply.send(Ok(stream)).is_err() {
                // Caller stopped waiting; the returned stream is dropped here
                flight.state = TaskState::ClientClosedEarly;
                flight.cancel.store(true, Ordering::Release);
            } else {
                flight.state = TaskState::Streaming;
            }
        }
    }

    fn on_finished(&mut self, worker: WorkerId, task: TaskId, outcome: TaskOutcome) {
        let owned = self
            .in_flight
            .get(&task)
            .map(|flight| flight.worker == worker)
            .unwrap_or(false);

        if owned {
            if let Some(mut flight) = self.in_flight.remove(&task) {
                // Completed means `Done` reached the caller's channel, even if
                // the caller hung up right after reading it
                let state = match (flight.state, &outcome) {
                    (TaskState::TimedOut, _) => TaskState::TimedOut,
                    (_, TaskOutcome::Completed) => TaskState::Completed,
                    (TaskState::ClientClosedEarly, _) | (_, TaskOutcome::Cancelled) => {
                        TaskState::ClientClosedEarly
                    }
                    (_, TaskOutcome::Failed(_)) => TaskState::Failed,
                };
                flight.state = state;

                match state {
                    TaskState::Completed => self.stats.completed += 1,
                    TaskState::Failed => self.stats.failed += 1,
                    TaskState::ClientClosedEarly => self.stats.cancelled += 1,
                    _ => {}
                }

                if let TaskOutcome::Failed(message) = &outcome {
                    tracing::warn!(task, worker, error = %message, "Task failed");
                } else {
                    tracing::debug!(task, worker, state = %state, "Task finished");
                }
            }
        }

        if self.workers.contains_key(&worker) && !self.idle.contains(&worker) {
            self.idle.push(worker);
        }
        self.dispatch();
    }

    fn on_exited(&mut self, worker: WorkerId, panicked: bool) {
        // Workers only stop on their own when something went wrong
        let Some(handle) = self.workers.remove(&worker) else {
            return;
        };
        drop(handle);
        self.idle.retain(|w| *w != worker);

        let orphaned: Vec<TaskId> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.worker == worker)
            .map(|(id, _)| *id)
            .collect();

        for task in orphaned {
            if let Some(mut flight) = self.in_flight.remove(&task) {
                flight.state = TaskState::Failed;
                flight.fail(PoolError::WorkerCrashed { worker, task });
                self.stats.failed += 1;
            }
        }

        self.stats.crashed += 1;
        tracing::warn!(worker, panicked, "Worker exited unexpectedly, spawning replacement");
        self.spawn_worker();
        self.dispatch();
    }

    fn on_deadline(&mut self, task: TaskId) {
        let Some(flight) = self.in_flight.get_mut(&task) else {
            return;
        };

        if !flight.state.is_terminal() {
            flight.state = TaskState::TimedOut;
            flight.fail(PoolError::Timeout {
                task,
                timeout: self.config.task_timeout,
            });
            self.stats.timed_out += 1;
            tracing::warn!(task, worker = flight.worker, timeout = ?self.config.task_timeout, "Task timed out");
        }

        let tx = self.tx.clone();
        let grace = self.config.retire_grace;
        let worker = flight.worker;
        flight.timers.push(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(PoolMsg::RetireCheck { task, worker });
        }));
    }

    /// The caller dropped its stream
    ///
    /// A worker still inside its runner is replaced at once so the slot is
    /// free for the next task; the cancel flag stops the old thread at its
    /// next line. A worker whose runner already returned keeps its slot and
    /// reports through `Finished`.
    fn on_caller_closed(&mut self, task: TaskId) {
        let Some(flight) = self.in_flight.get_mut(&task) else {
            return;
        };
        flight.cancel.store(true, Ordering::Release);

        if flight.settled.load(Ordering::Acquire) {
            if !flight.state.is_terminal() {
                flight.state = TaskState::ClientClosedEarly;
            }
            return;
        }

        let worker = flight.worker;
        if flight.state == TaskState::TimedOut {
            self.stats.retired += 1;
        } else {
            flight.state = TaskState::ClientClosedEarly;
            self.stats.cancelled += 1;
        }

        tracing::debug!(task, worker, "Caller closed stream early, replacing worker");
        self.retire(task, worker);
    }

    fn on_retire_check(&mut self, task: TaskId, worker: WorkerId) {
        let stuck = self
            .in_flight
            .get(&task)
            .map(|flight| flight.worker == worker)
            .unwrap_or(false);
        if !stuck {
            return;
        }

        self.stats.retired += 1;
        tracing::warn!(task, worker, "Worker unresponsive after timeout, retiring");
        self.retire(task, worker);
    }

    /// Forget a busy worker and spawn its replacement
    fn retire(&mut self, task: TaskId, worker: WorkerId) {
        self.in_flight.remove(&task);
        // Dropping the handle closes the worker's inbox; the thread exits
        // whenever it returns from its current task.
        self.workers.remove(&worker);
        self.idle.retain(|w| *w != worker);

        self.spawn_worker();
        self.dispatch();
    }

    fn spawn_worker(&mut self) -> bool {
        let id = self.next_worker;
        self.next_worker += 1;

        match spawn_worker(
            id,
            Arc::clone(&self.runner),
            self.config.reader_cache_capacity,
            self.tx.clone(),
        ) {
            Ok(handle) => {
                self.workers.insert(id, handle);
                self.idle.push(id);
                self.stats.spawned += 1;
                tracing::debug!(worker = id, "Worker spawned");
                true
            }
            Err(e) => {
                tracing::error!(worker = id, error = %e, "Failed to spawn worker thread");
                false
            }
        }
    }

    async fn shutdown(&mut self) {
        self.idle.clear();
        let threads: Vec<std::thread::JoinHandle<()>> = self
            .workers
            .drain()
            .map(|(_, handle)| {
                drop(handle.commands);
                handle.thread
            })
            .collect();
        let count = threads.len();

        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                let _ = thread.join();
            }
        })
        .await;
        if let Err(e) = joined {
            tracing::warn!(error = %e, "Failed to join worker threads");
        }

        tracing::info!(workers = count, "Worker pool drained");
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }
}

/// Handle to the worker pool; cheap to clone
#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<PoolMsg>,
    size: usize,
}

impl WorkerPool {
    /// Start a pool running range queries
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: PoolConfig) -> Self {
        Self::with_runner(config, Arc::new(RangeRunner))
    }

    /// Start a pool with a custom task runner
    pub fn with_runner(config: PoolConfig, runner: Arc<dyn TaskRunner>) -> Self {
        let size = config.size.max(1);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut coordinator = Coordinator::new(config, runner, tx.clone());
        for _ in 0..size {
            coordinator.spawn_worker();
        }
        tracing::info!(size, "Worker pool started");

        tokio::spawn(coordinator.run(rx));
        Self { tx, size }
    }

    /// Configured number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a range query; resolves once a worker has accepted it
    pub async fn schedule(&self, params: RangeParams) -> PoolResult<TaskStream> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::Schedule { params, reply })
            .map_err(|_| PoolError::ShutDown)?;
        rx.await.map_err(|_| PoolError::ShutDown)?
    }

    /// Current pool state
    pub async fn stats(&self) -> PoolResult<PoolStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PoolMsg::Stats { reply })
            .map_err(|_| PoolError::ShutDown)?;
        rx.await.map_err(|_| PoolError::ShutDown)
    }

    /// Wait for queued and in-flight tasks to finish, then stop every worker
    ///
    /// Workers close their cached readers as they exit. New tasks are
    /// rejected once draining starts.
    pub async fn drain(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(PoolMsg::Drain { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}
