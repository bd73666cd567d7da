//! The single consumer of the job queue.

use super::{JobError, JobId, JobReceiver, WorkItem};
use crate::scope::{with_scope, Scope, ScopeFactory};
use crate::sessions::{SessionError, SessionId, SessionStore};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Phases of one scheduler iteration, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Waiting for the next item.
    Waiting,
    /// An item was taken from the queue.
    Dequeued,
    /// The job's scope exists.
    ScopeCreated,
    /// The scope joined a session.
    SessionBound,
    /// The job body is executing.
    Running,
    /// The body returned successfully.
    Completed,
    /// The body failed, panicked, or never ran.
    Failed,
    /// The scope released its session hold.
    ScopeTornDown,
}

impl JobPhase {
    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Dequeued => "DEQUEUED",
            Self::ScopeCreated => "SCOPE_CREATED",
            Self::SessionBound => "SESSION_BOUND",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::ScopeTornDown => "SCOPE_TORN_DOWN",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one scheduler iteration ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// The body returned `Ok`.
    Completed,
    /// The body returned an error.
    Failed(JobError),
    /// The body panicked.
    Panicked(String),
    /// The scope could not join a session; the body never ran.
    Rejected(SessionError),
}

impl JobOutcome {
    /// Whether the job body ran to successful completion.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Runs queued jobs one at a time, each in its own scope and session.
#[derive(Debug)]
pub struct JobScheduler {
    receiver: JobReceiver,
    scopes: Arc<dyn ScopeFactory>,
    sessions: Arc<dyn SessionStore>,
}

impl JobScheduler {
    /// Create a scheduler draining `receiver`.
    #[must_use]
    pub fn new(
        receiver: JobReceiver,
        scopes: Arc<dyn ScopeFactory>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            receiver,
            scopes,
            sessions,
        }
    }

    /// Run until `shutdown` fires or every producer is gone.
    ///
    /// A running job is never aborted; it sees `shutdown` through its own
    /// child token. Items still queued when the loop stops are dropped and
    /// their session hand-offs released.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Job scheduler started");

        loop {
            tracing::debug!(phase = %JobPhase::Waiting, "Waiting for next job");
            let Some(item) = self.receiver.dequeue(&shutdown).await else {
                break;
            };

            if self.run_one(item, &shutdown).await.is_completed() {
                self.receiver.record_completed();
            } else {
                self.receiver.record_failed();
            }
        }

        self.drain().await;
        tracing::info!("Job scheduler stopped");
    }

    /// Execute one dequeued item through every phase.
    pub async fn run_one(&self, item: WorkItem, shutdown: &CancellationToken) -> JobOutcome {
        let job_id = item.id();
        let name = item.name().to_string();
        let parent = item.parent_session();
        let holds_handoff = item.holds_handoff();
        tracing::debug!(%job_id, job = %name, phase = %JobPhase::Dequeued, "Job dequeued");

        let scope = self.scopes.create_scope();
        tracing::debug!(
            %job_id,
            scope_id = %scope.id(),
            phase = %JobPhase::ScopeCreated,
            "Scope created"
        );

        let outcome = match self.bind_session(&scope, parent, holds_handoff).await {
            Ok(session_id) => {
                let scope = scope.clone().with_session(session_id);
                tracing::debug!(
                    %job_id,
                    %session_id,
                    phase = %JobPhase::SessionBound,
                    "Scope bound to session"
                );
                self.execute(job_id, &name, item, scope, shutdown).await
            }
            Err(e) => {
                tracing::error!(
                    %job_id,
                    job = %name,
                    parent_session = ?parent,
                    error = %e,
                    "Failed to bind job to a session, job not run"
                );
                if let Some(session_id) = parent.filter(|_| holds_handoff) {
                    self.release_rejected_handoff(session_id, &e).await;
                }
                JobOutcome::Rejected(e)
            }
        };

        self.teardown(job_id, &scope).await;
        outcome
    }

    async fn bind_session(
        &self,
        scope: &Scope,
        parent: Option<SessionId>,
        holds_handoff: bool,
    ) -> Result<SessionId, SessionError> {
        let session = match parent {
            Some(session_id) if holds_handoff => {
                self.sessions.claim_handoff(session_id, scope.id()).await?
            }
            Some(session_id) => {
                self.sessions
                    .add_scope_to_session(session_id, scope.id())
                    .await?
            }
            None => self.sessions.create_session(scope.id()).await?,
        };
        Ok(session.id())
    }

    async fn execute(
        &self,
        job_id: JobId,
        name: &str,
        item: WorkItem,
        scope: Scope,
        shutdown: &CancellationToken,
    ) -> JobOutcome {
        let job = item.into_job();
        let cancel = shutdown.child_token();
        tracing::debug!(%job_id, phase = %JobPhase::Running, "Running job");

        let task = tokio::spawn(with_scope(scope.clone(), job.execute(scope, cancel)));

        match task.await {
            Ok(Ok(())) => {
                tracing::debug!(%job_id, job = %name, phase = %JobPhase::Completed, "Job completed");
                JobOutcome::Completed
            }
            Ok(Err(e)) => {
                tracing::error!(
                    %job_id,
                    job = %name,
                    phase = %JobPhase::Failed,
                    error = %e,
                    "Job failed"
                );
                JobOutcome::Failed(e)
            }
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                tracing::error!(
                    %job_id,
                    job = %name,
                    phase = %JobPhase::Failed,
                    panic = %message,
                    "Job panicked"
                );
                JobOutcome::Panicked(message)
            }
            Err(join_error) => {
                tracing::error!(%job_id, job = %name, error = %join_error, "Job task aborted");
                JobOutcome::Failed(JobError::Cancelled)
            }
        }
    }

    /// Release the scope's session hold. Failures are logged only, so they
    /// never replace the job's own outcome.
    async fn teardown(&self, job_id: JobId, scope: &Scope) {
        match self.sessions.end_session(scope.id()).await {
            Ok(Some(session)) => tracing::debug!(
                %job_id,
                session_id = %session.id(),
                "Session ended with job scope"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                %job_id,
                scope_id = %scope.id(),
                error = %e,
                "Failed to end session for job scope"
            ),
        }
        tracing::debug!(
            %job_id,
            scope_id = %scope.id(),
            phase = %JobPhase::ScopeTornDown,
            "Scope torn down"
        );
    }

    /// Give back the reservation taken at enqueue time.
    ///
    /// Skipped when the agent did not answer: the scope may have been
    /// attached, consuming the reservation already.
    async fn release_rejected_handoff(&self, session_id: SessionId, cause: &SessionError) {
        if matches!(cause, SessionError::Timeout | SessionError::Unavailable) {
            return;
        }
        if let Err(e) = self.sessions.release_handoff(session_id).await {
            tracing::warn!(%session_id, error = %e, "Failed to release session hand-off");
        }
    }

    async fn drain(&mut self) {
        for item in self.receiver.drain() {
            tracing::warn!(
                job_id = %item.id(),
                job = %item.name(),
                "Dropping queued job at shutdown"
            );
            if let Some(session_id) = item.parent_session().filter(|_| item.holds_handoff()) {
                if let Err(e) = self.sessions.release_handoff(session_id).await {
                    tracing::warn!(%session_id, error = %e, "Failed to release session hand-off");
                }
            }
        }
    }
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "non-string panic payload".to_string(), |s| (*s).to_string()),
    }
}
