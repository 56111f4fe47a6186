//! Task lifecycle and the caller-side result stream

use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

use super::error::PoolError;

/// Identifier of a scheduled task
pub type TaskId = u64;

/// Identifier of a worker thread (never reused, replacements get new ids)
pub type WorkerId = u64;

/// Lifecycle of one task
///
/// ```text
/// Queued → Assigned → Accepted → Streaming → Completed
///                                          ↘ Failed | TimedOut | ClientClosedEarly
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Assigned,
    Accepted,
    Streaming,
    Completed,
    Failed,
    TimedOut,
    ClientClosedEarly,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::Failed
                | TaskState::TimedOut
                | TaskState::ClientClosedEarly
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Queued => "queued",
            TaskState::Assigned => "assigned",
            TaskState::Accepted => "accepted",
            TaskState::Streaming => "streaming",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::TimedOut => "timed_out",
            TaskState::ClientClosedEarly => "client_closed_early",
        };
        write!(f, "{}", name)
    }
}

/// What a worker writes on a task's line channel
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Line(String),
    Done,
    Failed(String),
}

/// Streaming handle returned by [`WorkerPool::schedule`](super::WorkerPool::schedule)
///
/// Yields every produced line, then ends after the completion signal. A
/// failure (query error, timeout, worker crash) is yielded once as `Err` and
/// ends the stream. Dropping the handle tells the pool the caller went away.
pub struct TaskStream {
    id: TaskId,
    lines: mpsc::Receiver<StreamEvent>,
    abort: Option<oneshot::Receiver<PoolError>>,
    finished: bool,
}

impl TaskStream {
    pub(crate) fn new(
        id: TaskId,
        lines: mpsc::Receiver<StreamEvent>,
        abort: oneshot::Receiver<PoolError>,
    ) -> Self {
        Self {
            id,
            lines,
            abort: Some(abort),
            finished: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    fn fail(&mut self, err: PoolError) -> Poll<Option<Result<String, PoolError>>> {
        self.finished = true;
        self.lines.close();
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for TaskStream {
    type Item = Result<String, PoolError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        // Pool-side failures win over lines still buffered
        if let Some(abort) = this.abort.as_mut() {
            if let Poll::Ready(result) = Pin::new(abort).poll(cx) {
                this.abort = None;
                if let Ok(err) = result {
                    return this.fail(err);
                }
            }
        }

        match this.lines.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Line(line))) => Poll::Ready(Some(Ok(line))),
            Poll::Ready(Some(StreamEvent::Done)) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(StreamEvent::Failed(message))) => this.fail(PoolError::Query(message)),
            Poll::Ready(None) => {
                // Worker vanished without a signal; the pool reports why
                if this.abort.is_some() {
                    Poll::Pending
                } else {
                    let id = this.id;
                    this.fail(PoolError::StreamClosed(id))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
