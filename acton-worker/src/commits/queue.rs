//! Unbounded, strictly ordered queue of commit requests.

use super::{CommitError, CommitOutcome};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

type CommitResult = Result<CommitOutcome, CommitError>;

/// A file write destined for the versioned store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// File name, relative to `directory`.
    pub path: String,
    /// File content.
    pub content: Vec<u8>,
    /// Directory the file lives in; empty for the repository root.
    pub directory: String,
    /// Commit message.
    pub message: String,
}

impl CommitRequest {
    /// Build a request.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        directory: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            directory: directory.into(),
            message: message.into(),
        }
    }

    /// Repository path the content is written to.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::InvalidRequest`] for an empty file name, an
    /// empty message, or a path with empty, `.` or `..` segments.
    pub fn target_path(&self) -> Result<String, CommitError> {
        if self.message.trim().is_empty() {
            return Err(CommitError::InvalidRequest("commit message is empty".to_string()));
        }

        let file = self.path.trim_matches('/');
        if file.is_empty() {
            return Err(CommitError::InvalidRequest("file path is empty".to_string()));
        }

        let directory = self.directory.trim_matches('/');
        let joined = if directory.is_empty() {
            file.to_string()
        } else {
            format!("{directory}/{file}")
        };

        if joined
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(CommitError::InvalidRequest(format!(
                "invalid path segment in '{joined}'"
            )));
        }
        Ok(joined)
    }
}

/// A queued request and the caller waiting on it.
#[derive(Debug)]
pub(crate) struct PendingCommit {
    pub(crate) request: CommitRequest,
    reply: oneshot::Sender<CommitResult>,
}

impl PendingCommit {
    /// Hand the result to the caller. A caller that stopped waiting is ignored.
    pub(crate) fn resolve(self, result: CommitResult) {
        let _ = self.reply.send(result);
    }
}

/// Producer side of the commit queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommitQueue {
    sender: mpsc::UnboundedSender<PendingCommit>,
}

/// Consumer side of the commit queue, owned by the processor.
#[derive(Debug)]
pub struct CommitReceiver {
    receiver: mpsc::UnboundedReceiver<PendingCommit>,
}

impl CommitQueue {
    /// Create the queue.
    #[must_use]
    pub fn unbounded() -> (Self, CommitReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, CommitReceiver { receiver })
    }

    /// Queue `request` behind every request submitted before it.
    ///
    /// Never blocks. Await the returned handle for the outcome; invalid
    /// requests resolve at once without being queued.
    pub fn submit(&self, request: CommitRequest) -> CommitHandle {
        if let Err(e) = request.target_path() {
            return CommitHandle::ready(Err(e));
        }

        let (reply, rx) = oneshot::channel();
        match self.sender.send(PendingCommit { request, reply }) {
            Ok(()) => CommitHandle::waiting(rx),
            Err(_) => CommitHandle::ready(Err(CommitError::ProcessorStopped)),
        }
    }

    /// Queue a write of `content` to `directory/path`.
    pub fn submit_commit(
        &self,
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        directory: impl Into<String>,
        message: impl Into<String>,
    ) -> CommitHandle {
        self.submit(CommitRequest::new(path, content, directory, message))
    }

    /// Whether the processor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl CommitReceiver {
    pub(crate) async fn recv(&mut self) -> Option<PendingCommit> {
        self.receiver.recv().await
    }

    /// Close the queue and take every request still in it.
    pub(crate) fn drain(&mut self) -> Vec<PendingCommit> {
        self.receiver.close();

        let mut remaining = Vec::new();
        while let Ok(pending) = self.receiver.try_recv() {
            remaining.push(pending);
        }
        remaining
    }
}

/// Completion of a submitted commit.
///
/// Resolves once the commit is applied or has definitively failed. If the
/// processor goes away without answering, it resolves to
/// [`CommitError::ProcessorStopped`].
#[derive(Debug)]
#[must_use = "a commit handle does nothing unless awaited"]
pub struct CommitHandle {
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Waiting(oneshot::Receiver<CommitResult>),
    Ready(Option<CommitResult>),
}

impl CommitHandle {
    const fn waiting(rx: oneshot::Receiver<CommitResult>) -> Self {
        Self {
            state: HandleState::Waiting(rx),
        }
    }

    const fn ready(result: CommitResult) -> Self {
        Self {
            state: HandleState::Ready(Some(result)),
        }
    }
}

impl Future for CommitHandle {
    type Output = CommitResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(CommitError::ProcessorStopped))),
            HandleState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CommitError::ProcessorStopped)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_path_joins_directory() {
        let request = CommitRequest::new("chat.md", b"hi".to_vec(), "/transcripts/2024/", "Save");
        assert_eq!(request.target_path().unwrap(), "transcripts/2024/chat.md");

        let root = CommitRequest::new("/README.md", b"".to_vec(), "", "Docs");
        assert_eq!(root.target_path().unwrap(), "README.md");
    }

    #[test]
    fn test_target_path_rejects_bad_input() {
        for request in [
            CommitRequest::new("", b"x".to_vec(), "dir", "msg"),
            CommitRequest::new("a.md", b"x".to_vec(), "dir/../etc", "msg"),
            CommitRequest::new("a.md", b"x".to_vec(), "dir//nested", "msg"),
            CommitRequest::new("a.md", b"x".to_vec(), "dir", "   "),
        ] {
            assert!(matches!(
                request.target_path(),
                Err(CommitError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_invalid_request_fails_fast() {
        let (queue, mut receiver) = CommitQueue::unbounded();
        let result = queue.submit_commit("", b"x".to_vec(), "dir", "msg").await;
        assert!(matches!(result, Err(CommitError::InvalidRequest(_))));
        assert!(receiver.drain().is_empty());
    }

    #[tokio::test]
    async fn test_handle_resolves_from_processor_side() {
        let (queue, mut receiver) = CommitQueue::unbounded();
        let first = queue.submit_commit("a.md", b"a".to_vec(), "", "First");
        let second = queue.submit_commit("b.md", b"b".to_vec(), "", "Second");

        let pending = receiver.recv().await.unwrap();
        assert_eq!(pending.request.message, "First");
        pending.resolve(Err(CommitError::Cancelled));
        assert_eq!(first.await.unwrap_err(), CommitError::Cancelled);

        // Dropped without an answer
        drop(receiver.recv().await.unwrap());
        assert_eq!(second.await.unwrap_err(), CommitError::ProcessorStopped);
    }

    #[tokio::test]
    async fn test_submit_after_close_fails() {
        let (queue, mut receiver) = CommitQueue::unbounded();
        receiver.drain();
        assert!(queue.is_closed());
        assert_eq!(
            queue
                .submit_commit("a.md", b"a".to_vec(), "", "Late")
                .await
                .unwrap_err(),
            CommitError::ProcessorStopped
        );
    }
}
