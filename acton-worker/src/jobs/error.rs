//! Job error types.

use crate::commits::CommitError;
use crate::sessions::SessionError;

/// Job execution errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The job body reported a failure.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// The job stopped because shutdown was requested.
    #[error("Job cancelled")]
    Cancelled,

    /// The job body panicked.
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// A commit submitted by the job failed.
    #[error("Commit failed: {0}")]
    Commit(#[from] CommitError),

    /// A session operation performed by the job failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Any other error raised by the job body.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised to producers by the job queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobQueueError {
    /// A queue needs room for at least one item.
    #[error("Invalid job queue capacity: {0}")]
    InvalidCapacity(usize),

    /// The scheduler has stopped and accepts no more jobs.
    #[error("Job queue is closed")]
    Closed,

    /// The parent session could not be held for the job.
    #[error("Cannot hand job to session: {0}")]
    Session(#[from] SessionError),
}

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;
