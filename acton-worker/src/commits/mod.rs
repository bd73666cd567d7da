//! Serialized writes to an external versioned store.
//!
//! Every commit from every job goes through one [`CommitQueue`]. A single
//! [`CommitProcessor`] applies them in submission order, each as a
//! read-modify-write against the branch tip:
//!
//! 1. read the branch tip
//! 2. create a blob for the content
//! 3. create a tree placing the blob at the target path on top of the tip's tree
//! 4. create a commit whose parent is the tip
//! 5. fast-forward the branch to the new commit
//!
//! Rate limits and non-fast-forward rejections restart the sequence from
//! step 1 after an exponential backoff ([`RetryPolicy`]). Anything else fails
//! the commit at once.

mod memory;
mod processor;
mod queue;
mod retry;
mod store;

pub use memory::MemoryStore;
pub use processor::{CommitError, CommitOutcome, CommitProcessor};
pub use queue::{CommitHandle, CommitQueue, CommitReceiver, CommitRequest};
pub use retry::RetryPolicy;
pub use store::{BranchTip, ObjectId, StoreError, TreeEntry, VersionedStore};
