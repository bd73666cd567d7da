//! Lifecycle of the two consumer loops.

use crate::commits::{CommitHandle, CommitProcessor, CommitQueue, VersionedStore};
use crate::config::WorkerConfig;
use crate::jobs::{
    panic_message, Job, JobId, JobMetrics, JobQueue, JobQueueError, JobScheduler, WorkItem,
};
use crate::scope::ScopeFactory;
use crate::sessions::{SessionId, SessionStore};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Worker startup and shutdown errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The job queue could not be built from the configuration.
    #[error("Invalid job queue configuration: {0}")]
    JobQueue(#[from] JobQueueError),

    /// `start` was called outside a Tokio runtime.
    #[error("Worker must be started inside a Tokio runtime")]
    NoRuntime,

    /// A consumer loop panicked.
    #[error("{task} panicked: {message}")]
    TaskPanicked {
        /// Loop that panicked.
        task: &'static str,
        /// Panic message.
        message: String,
    },
}

/// The running job scheduler and commit processor.
///
/// Both loops share one shutdown signal. Dropping the worker without calling
/// [`Worker::shutdown`] leaves them running until every [`WorkerHandle`] is gone.
#[derive(Debug)]
pub struct Worker {
    handle: WorkerHandle,
    scheduler: JoinHandle<()>,
    processor: JoinHandle<()>,
}

impl Worker {
    /// Spawn the job scheduler and the commit processor.
    ///
    /// # Errors
    ///
    /// Returns an error if the job queue capacity is invalid or no Tokio
    /// runtime is running.
    pub fn start(
        config: &WorkerConfig,
        scopes: Arc<dyn ScopeFactory>,
        sessions: Arc<dyn SessionStore>,
        store: Arc<dyn VersionedStore>,
    ) -> Result<Self, WorkerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        let (jobs, job_receiver) = JobQueue::bounded(config.jobs.queue_capacity)?;
        let (commits, commit_receiver) = CommitQueue::unbounded();
        let shutdown = CancellationToken::new();

        let scheduler = JobScheduler::new(job_receiver, scopes, sessions.clone());
        let processor = CommitProcessor::new(commit_receiver, store, &config.commits);

        let scheduler = runtime.spawn(scheduler.run(shutdown.clone()));
        let processor = runtime.spawn(processor.run(shutdown.clone()));

        tracing::info!(
            queue_capacity = config.jobs.queue_capacity,
            branch = %config.commits.branch,
            "Worker started"
        );

        Ok(Self {
            handle: WorkerHandle {
                jobs,
                commits,
                sessions,
                shutdown,
            },
            scheduler,
            processor,
        })
    }

    /// A handle for producers.
    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Signal both loops to stop and wait for them.
    ///
    /// The running job, if any, is not aborted; it observes the signal through
    /// its cancellation token. Queued jobs are dropped and queued commits
    /// resolve as cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::TaskPanicked`] if a loop panicked.
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        tracing::info!("Worker shutting down");
        self.handle.shutdown.cancel();

        let scheduler = self.scheduler.await;
        let processor = self.processor.await;
        joined("job scheduler", scheduler)?;
        joined("commit processor", processor)?;

        tracing::info!("Worker stopped");
        Ok(())
    }
}

fn joined(task: &'static str, result: Result<(), JoinError>) -> Result<(), WorkerError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            tracing::error!(task, %message, "Worker loop panicked");
            Err(WorkerError::TaskPanicked { task, message })
        }
        // Aborted by runtime shutdown
        Err(_) => Ok(()),
    }
}

/// Producer access to a running [`Worker`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    jobs: JobQueue,
    commits: CommitQueue,
    sessions: Arc<dyn SessionStore>,
    shutdown: CancellationToken,
}

impl WorkerHandle {
    /// Queue a job, optionally continuing `parent`.
    ///
    /// Waits while the queue is full. A parent session is held open from
    /// this call until the job's scope joins it.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent session cannot be held (unknown or
    /// already ended) or the worker has stopped.
    pub async fn enqueue_job<J: Job>(
        &self,
        job: J,
        parent: Option<SessionId>,
    ) -> Result<JobId, JobQueueError> {
        if let Some(session_id) = parent {
            self.sessions.reserve_handoff(session_id).await?;
        }

        match self.jobs.enqueue(WorkItem::new(job, parent).with_handoff()).await {
            Ok(job_id) => {
                tracing::debug!(%job_id, parent_session = ?parent, "Job queued");
                Ok(job_id)
            }
            Err(e) => {
                if let Some(session_id) = parent {
                    if let Err(release) = self.sessions.release_handoff(session_id).await {
                        tracing::warn!(%session_id, error = %release, "Failed to release session hand-off");
                    }
                }
                Err(e)
            }
        }
    }

    /// Queue a write of `content` to `directory/path`. Await the handle for
    /// the outcome.
    pub fn submit_commit(
        &self,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        directory: impl Into<String>,
        message: impl Into<String>,
    ) -> CommitHandle {
        self.commits.submit_commit(path, content, directory, message)
    }

    /// The commit queue, for job bodies that write artifacts.
    #[must_use]
    pub const fn commits(&self) -> &CommitQueue {
        &self.commits
    }

    /// The job queue.
    #[must_use]
    pub const fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    /// The session store the scheduler binds scopes through.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Job counters.
    #[must_use]
    pub fn metrics(&self) -> JobMetrics {
        self.jobs.metrics()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commits::MemoryStore;
    use crate::scope::{ContainerScopeFactory, ServiceRegistry};
    use crate::sessions::AgentSessionStore;
    use acton_reactive::prelude::ActonApp;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_capacity_rejected_at_start() {
        let mut runtime = ActonApp::launch_async().await;
        let mut config = WorkerConfig::default();
        config.jobs.queue_capacity = 0;
        let sessions = AgentSessionStore::spawn(&mut runtime, &config.sessions)
            .await
            .unwrap();

        let result = Worker::start(
            &config,
            Arc::new(ContainerScopeFactory::new(ServiceRegistry::new())),
            Arc::new(sessions),
            Arc::new(MemoryStore::new("main")),
        );
        assert!(matches!(
            result,
            Err(WorkerError::JobQueue(JobQueueError::InvalidCapacity(0)))
        ));

        runtime.shutdown_all().await.expect("Failed to shutdown");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_is_clean() {
        let mut runtime = ActonApp::launch_async().await;
        let config = WorkerConfig::default();
        let sessions = AgentSessionStore::spawn(&mut runtime, &config.sessions)
            .await
            .unwrap();

        let worker = Worker::start(
            &config,
            Arc::new(ContainerScopeFactory::new(ServiceRegistry::new())),
            Arc::new(sessions),
            Arc::new(MemoryStore::new("main")),
        )
        .unwrap();
        let handle = worker.handle();
        assert!(!handle.is_shutting_down());

        worker.shutdown().await.unwrap();
        assert!(handle.is_shutting_down());
        assert!(handle.commits().is_closed());
        assert!(handle.jobs().is_closed());

        runtime.shutdown_all().await.expect("Failed to shutdown");
    }
}
