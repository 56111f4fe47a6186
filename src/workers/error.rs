//! Worker pool error types

use std::time::Duration;
use thiserror::Error;

use super::task::{TaskId, WorkerId};

/// Errors surfaced to the caller of a scheduled task
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool could not accept the task
    #[error("Scheduling failed: {0}")]
    Scheduling(String),

    /// The task exceeded its deadline
    #[error("Task {task} timed out after {timeout:?}")]
    Timeout { task: TaskId, timeout: Duration },

    /// The worker running the task exited unexpectedly
    #[error("Worker {worker} crashed while running task {task}")]
    WorkerCrashed { worker: WorkerId, task: TaskId },

    /// The range query itself failed
    #[error("Query failed: {0}")]
    Query(String),

    /// The worker's stream ended without a completion signal
    #[error("Task {0} stream closed unexpectedly")]
    StreamClosed(TaskId),

    /// The pool has been drained
    #[error("Worker pool is shut down")]
    ShutDown,
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PoolError::Timeout {
            task: 7,
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Task 7 timed out after 1.5s");

        let err = PoolError::WorkerCrashed { worker: 2, task: 9 };
        assert_eq!(err.to_string(), "Worker 2 crashed while running task 9");
    }
}
