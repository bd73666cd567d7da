//! The single consumer of the commit queue.

use super::{CommitReceiver, CommitRequest, ObjectId, RetryPolicy, StoreError, TreeEntry, VersionedStore};
use crate::config::CommitsConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A commit that landed on the branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The new branch tip.
    pub commit: ObjectId,
    /// The tip it was built on.
    pub parent: ObjectId,
    /// Repository path that was written.
    pub path: String,
    /// Attempts used, the successful one included.
    pub attempts: u32,
}

/// Why a commit did not land.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    /// The request was malformed; nothing was sent to the store.
    #[error("Invalid commit request: {0}")]
    InvalidRequest(String),

    /// The store failed with a non-retryable error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Every attempt hit a transient conflict.
    #[error("Commit failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: StoreError,
    },

    /// Shutdown stopped the commit before it landed.
    #[error("Commit cancelled by shutdown")]
    Cancelled,

    /// The processor is gone and will never answer.
    #[error("Commit processor is not running")]
    ProcessorStopped,
}

/// Applies queued commits to one branch, one at a time, in submission order.
#[derive(Debug)]
pub struct CommitProcessor {
    receiver: CommitReceiver,
    store: Arc<dyn VersionedStore>,
    branch: String,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl CommitProcessor {
    /// Create a processor draining `receiver` into `store`.
    #[must_use]
    pub fn new(receiver: CommitReceiver, store: Arc<dyn VersionedStore>, config: &CommitsConfig) -> Self {
        Self {
            receiver,
            store,
            branch: config.branch.clone(),
            policy: config.retry_policy(),
            call_timeout: config.call_timeout(),
        }
    }

    /// Run until `shutdown` fires or every producer is gone.
    ///
    /// Requests still queued when the loop stops resolve with
    /// [`CommitError::Cancelled`].
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(branch = %self.branch, "Commit processor started");

        loop {
            let pending = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                pending = self.receiver.recv() => match pending {
                    Some(pending) => pending,
                    None => break,
                },
            };

            let result = self.process(&pending.request, &shutdown).await;
            match &result {
                Ok(outcome) => tracing::info!(
                    path = %outcome.path,
                    commit = %outcome.commit,
                    attempts = outcome.attempts,
                    "Commit applied"
                ),
                Err(e) => tracing::error!(
                    path = %pending.request.path,
                    directory = %pending.request.directory,
                    error = %e,
                    "Commit failed"
                ),
            }
            pending.resolve(result);
        }

        let remaining = self.receiver.drain();
        if !remaining.is_empty() {
            tracing::warn!(count = remaining.len(), "Cancelling queued commits at shutdown");
        }
        for pending in remaining {
            pending.resolve(Err(CommitError::Cancelled));
        }
        tracing::info!("Commit processor stopped");
    }

    /// Apply one request, retrying transient conflicts.
    ///
    /// Each attempt starts from a fresh read of the branch tip. Shutdown
    /// interrupts the wait between attempts, never an attempt in flight.
    ///
    /// # Errors
    ///
    /// Returns the terminal store error, [`CommitError::RetriesExhausted`],
    /// or [`CommitError::Cancelled`].
    pub async fn process(
        &self,
        request: &CommitRequest,
        shutdown: &CancellationToken,
    ) -> Result<CommitOutcome, CommitError> {
        let path = request.target_path()?;
        let mut attempt = 1;

        loop {
            match self.apply_once(&path, request).await {
                Ok((commit, parent)) => {
                    return Ok(CommitOutcome {
                        commit,
                        parent,
                        path,
                        attempts: attempt,
                    })
                }
                Err(e) if self.policy.should_retry(&e, attempt) => {
                    let delay = self.policy.delay_after(&e, attempt);
                    tracing::warn!(
                        %path,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Transient store conflict, retrying"
                    );

                    tokio::select! {
                        biased;
                        () = shutdown.cancelled() => return Err(CommitError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(CommitError::RetriesExhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => return Err(CommitError::Store(e)),
            }
        }
    }

    /// Read tip, blob, tree, commit, move branch.
    ///
    /// Returns the new commit and the tip it was built on.
    async fn apply_once(
        &self,
        path: &str,
        request: &CommitRequest,
    ) -> Result<(ObjectId, ObjectId), StoreError> {
        let tip = self.call(self.store.read_branch_tip(&self.branch)).await?;
        let blob = self.call(self.store.create_blob(&request.content)).await?;

        let entries = [TreeEntry {
            path: path.to_string(),
            blob,
        }];
        let tree = self.call(self.store.create_tree(&tip.tree, &entries)).await?;

        let parents = [tip.commit];
        let commit = self
            .call(self.store.create_commit(&request.message, &tree, &parents))
            .await?;
        self.call(self.store.update_branch(&self.branch, &commit)).await?;

        let [parent] = parents;
        Ok((commit, parent))
    }

    async fn call<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.call_timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.call_timeout))?
    }
}
