//! Job definitions.

use super::JobResult;
use crate::scope::Scope;
use crate::sessions::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of background work.
///
/// The body receives the scope it runs in and the worker's cancellation
/// signal. Long-running external calls should watch `cancel`; the scheduler
/// never aborts a running job.
#[async_trait]
pub trait Job: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Run the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job fails. Failures are logged and counted;
    /// the job is not retried.
    async fn execute(self: Box<Self>, scope: Scope, cancel: CancellationToken) -> JobResult<()>;
}

/// A job backed by a closure. See [`job_fn`].
pub struct FnJob<F> {
    name: String,
    body: F,
}

impl<F> fmt::Debug for FnJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: FnOnce(Scope, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = JobResult<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(self: Box<Self>, scope: Scope, cancel: CancellationToken) -> JobResult<()> {
        (self.body)(scope, cancel).await
    }
}

/// Wrap a closure as a [`Job`].
#[must_use]
pub fn job_fn<F, Fut>(name: impl Into<String>, body: F) -> FnJob<F>
where
    F: FnOnce(Scope, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = JobResult<()>> + Send + 'static,
{
    FnJob {
        name: name.into(),
        body,
    }
}

/// A job waiting in the queue, with its optional parent session.
///
/// Immutable once built; it is consumed by exactly one scheduler iteration.
pub struct WorkItem {
    id: JobId,
    name: String,
    job: Box<dyn Job>,
    parent_session: Option<SessionId>,
    holds_handoff: bool,
    enqueued_at: DateTime<Utc>,
}

impl WorkItem {
    /// Wrap a job for queueing.
    #[must_use]
    pub fn new<J: Job>(job: J, parent_session: Option<SessionId>) -> Self {
        Self::from_boxed(Box::new(job), parent_session)
    }

    /// Wrap an already boxed job for queueing.
    #[must_use]
    pub fn from_boxed(job: Box<dyn Job>, parent_session: Option<SessionId>) -> Self {
        Self {
            id: JobId::new(),
            name: job.name().to_string(),
            job,
            parent_session,
            holds_handoff: false,
            enqueued_at: Utc::now(),
        }
    }

    /// Mark the item as holding a hand-off reservation on its parent session.
    pub(crate) fn with_handoff(mut self) -> Self {
        self.holds_handoff = self.parent_session.is_some();
        self
    }

    /// Job identifier.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session the job continues, if any.
    #[must_use]
    pub const fn parent_session(&self) -> Option<SessionId> {
        self.parent_session
    }

    /// Whether the parent session was reserved for this item when it was
    /// queued through [`WorkerHandle::enqueue_job`](crate::runtime::WorkerHandle::enqueue_job).
    #[must_use]
    pub const fn holds_handoff(&self) -> bool {
        self.holds_handoff
    }

    /// When the item was built.
    #[must_use]
    pub const fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub(crate) fn into_job(self) -> Box<dyn Job> {
        self.job
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent_session", &self.parent_session)
            .field("holds_handoff", &self.holds_handoff)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ContainerScopeFactory, ScopeFactory, ServiceRegistry};

    struct Named;

    #[async_trait]
    impl Job for Named {
        async fn execute(self: Box<Self>, _scope: Scope, _cancel: CancellationToken) -> JobResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_job_id_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_default_name_is_type_name() {
        let item = WorkItem::new(Named, None);
        assert!(item.name().ends_with("Named"));
        assert!(item.parent_session().is_none());
        assert!(!item.holds_handoff());
    }

    #[test]
    fn test_handoff_needs_parent() {
        assert!(!WorkItem::new(Named, None).with_handoff().holds_handoff());

        let parent = SessionId::generate();
        let item = WorkItem::new(Named, Some(parent)).with_handoff();
        assert!(item.holds_handoff());
        assert_eq!(item.parent_session(), Some(parent));
    }

    #[tokio::test]
    async fn test_job_fn_runs_closure() {
        let scope = ContainerScopeFactory::new(ServiceRegistry::new()).create_scope();
        let expected = scope.id();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let job = job_fn("session-check", move |scope: Scope, _cancel| async move {
            let _ = tx.send(scope.id());
            Ok(())
        });
        assert_eq!(job.name(), "session-check");

        Box::new(job)
            .execute(scope, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), expected);
    }
}
