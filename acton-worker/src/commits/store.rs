//! Client interface to the external versioned store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a blob, tree, or commit in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    /// Wrap a store-issued identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as issued by the store.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Head of a branch: its commit and that commit's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTip {
    /// Commit the branch points at.
    pub commit: ObjectId,
    /// Root tree of that commit.
    pub tree: ObjectId,
}

/// One file placed into a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Slash-separated path from the repository root.
    pub path: String,
    /// Blob holding the file content.
    pub blob: ObjectId,
}

/// Errors raised by a [`VersionedStore`].
///
/// Only [`RateLimited`](Self::RateLimited) and
/// [`NonFastForward`](Self::NonFastForward) are transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store is throttling requests.
    #[error("Rate limited by store{}", retry_hint(.retry_after.as_ref()))]
    RateLimited {
        /// Delay the store asked for, if it said.
        retry_after: Option<Duration>,
    },

    /// The branch moved since its tip was read.
    #[error("Update of branch '{branch}' is not a fast-forward")]
    NonFastForward {
        /// Branch that moved.
        branch: String,
    },

    /// Credentials were rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The store rejected the payload.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A branch or object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A call did not finish within its timeout.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure.
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether retrying the whole operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::NonFastForward { .. })
    }

    /// Delay requested by the store before the next attempt.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn retry_hint(retry_after: Option<&Duration>) -> String {
    retry_after.map_or_else(String::new, |d| format!(" (retry after {d:?})"))
}

/// Primitives of a git-like remote.
///
/// Every write goes through the same sequence: read the branch tip, create a
/// blob, create a tree on top of the tip's tree, create a commit whose parent
/// is the tip, then move the branch to that commit. `update_branch` must only
/// fast-forward and report [`StoreError::NonFastForward`] otherwise.
#[async_trait]
pub trait VersionedStore: Send + Sync + fmt::Debug {
    /// Current head of `branch`.
    async fn read_branch_tip(&self, branch: &str) -> Result<BranchTip, StoreError>;

    /// Store file content.
    async fn create_blob(&self, content: &[u8]) -> Result<ObjectId, StoreError>;

    /// Build a tree from `base_tree` with `entries` added or replaced.
    async fn create_tree(
        &self,
        base_tree: &ObjectId,
        entries: &[TreeEntry],
    ) -> Result<ObjectId, StoreError>;

    /// Create a commit of `tree` on top of `parents`.
    async fn create_commit(
        &self,
        message: &str,
        tree: &ObjectId,
        parents: &[ObjectId],
    ) -> Result<ObjectId, StoreError>;

    /// Move `branch` to `commit`.
    async fn update_branch(&self, branch: &str, commit: &ObjectId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::RateLimited { retry_after: None }.is_transient());
        assert!(StoreError::NonFastForward { branch: "main".into() }.is_transient());
        assert!(!StoreError::Unauthorized("bad token".into()).is_transient());
        assert!(!StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!StoreError::InvalidInput("empty path".into()).is_transient());
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let hint = Duration::from_secs(3);
        assert_eq!(
            StoreError::RateLimited { retry_after: Some(hint) }.retry_after(),
            Some(hint)
        );
        assert_eq!(StoreError::Other("x".into()).retry_after(), None);
    }

    #[test]
    fn test_rate_limit_message_mentions_hint() {
        let message = StoreError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        }
        .to_string();
        assert!(message.contains("retry after 2s"));
        assert_eq!(
            StoreError::RateLimited { retry_after: None }.to_string(),
            "Rate limited by store"
        );
    }
}
