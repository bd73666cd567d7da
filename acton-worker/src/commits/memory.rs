//! In-process versioned store for development and tests.

use super::{BranchTip, ObjectId, StoreError, TreeEntry, VersionedStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(BTreeMap<String, ObjectId>),
    Commit {
        tree: ObjectId,
        parents: Vec<ObjectId>,
        message: String,
    },
}

#[derive(Debug, Default)]
struct Repository {
    objects: HashMap<ObjectId, Object>,
    branches: HashMap<String, ObjectId>,
}

/// Content-addressed, git-like store held in memory.
///
/// Objects are keyed by the SHA-256 of their content. Branch updates only
/// fast-forward, like a protected remote branch.
#[derive(Debug)]
pub struct MemoryStore {
    repo: Mutex<Repository>,
}

impl MemoryStore {
    /// Create a store with `branch` pointing at an empty root commit.
    #[must_use]
    pub fn new(branch: &str) -> Self {
        let mut repo = Repository::default();
        let tree = repo.insert(Object::Tree(BTreeMap::new()));
        let root = repo.insert(Object::Commit {
            tree,
            parents: Vec::new(),
            message: "Initial commit".to_string(),
        });
        repo.branches.insert(branch.to_string(), root);

        Self {
            repo: Mutex::new(repo),
        }
    }

    /// Commit id `branch` points at.
    #[must_use]
    pub fn tip(&self, branch: &str) -> Option<ObjectId> {
        self.repo.lock().branches.get(branch).cloned()
    }

    /// Content of `path` at the tip of `branch`.
    #[must_use]
    pub fn file_at(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let repo = self.repo.lock();
        let tip = repo.branches.get(branch)?;
        let Some(Object::Commit { tree, .. }) = repo.objects.get(tip) else {
            return None;
        };
        let Some(Object::Tree(entries)) = repo.objects.get(tree) else {
            return None;
        };
        match repo.objects.get(entries.get(path)?) {
            Some(Object::Blob(content)) => Some(content.clone()),
            _ => None,
        }
    }

    /// Commit messages along the first-parent chain of `branch`, newest first.
    #[must_use]
    pub fn history(&self, branch: &str) -> Vec<String> {
        let repo = self.repo.lock();
        let mut messages = Vec::new();
        let mut cursor = repo.branches.get(branch).cloned();

        while let Some(id) = cursor {
            let Some(Object::Commit {
                parents, message, ..
            }) = repo.objects.get(&id)
            else {
                break;
            };
            messages.push(message.clone());
            cursor = parents.first().cloned();
        }
        messages
    }

    /// Write `path` on `branch` in one step, bypassing any queue.
    ///
    /// Stands in for a writer outside this process moving the branch.
    ///
    /// # Errors
    ///
    /// Fails if the branch does not exist.
    pub fn commit_directly(
        &self,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<ObjectId, StoreError> {
        let mut repo = self.repo.lock();
        let tip = repo.tip(branch)?;
        let blob = repo.insert(Object::Blob(content.to_vec()));
        let tree = repo.extend_tree(
            &tip.tree,
            &[TreeEntry {
                path: path.to_string(),
                blob,
            }],
        )?;
        let commit = repo.insert(Object::Commit {
            tree,
            parents: vec![tip.commit],
            message: message.to_string(),
        });
        repo.branches.insert(branch.to_string(), commit.clone());
        Ok(commit)
    }
}

impl Repository {
    fn insert(&mut self, object: Object) -> ObjectId {
        let id = object_id(&object);
        self.objects.entry(id.clone()).or_insert(object);
        id
    }

    fn tip(&self, branch: &str) -> Result<BranchTip, StoreError> {
        let commit = self
            .branches
            .get(branch)
            .ok_or_else(|| StoreError::NotFound(format!("branch {branch}")))?;
        match self.objects.get(commit) {
            Some(Object::Commit { tree, .. }) => Ok(BranchTip {
                commit: commit.clone(),
                tree: tree.clone(),
            }),
            _ => Err(StoreError::NotFound(format!("commit {commit}"))),
        }
    }

    fn extend_tree(
        &mut self,
        base_tree: &ObjectId,
        entries: &[TreeEntry],
    ) -> Result<ObjectId, StoreError> {
        let Some(Object::Tree(base)) = self.objects.get(base_tree) else {
            return Err(StoreError::NotFound(format!("tree {base_tree}")));
        };
        let mut tree = base.clone();

        for entry in entries {
            if entry.path.is_empty() {
                return Err(StoreError::InvalidInput("empty tree path".to_string()));
            }
            if !matches!(self.objects.get(&entry.blob), Some(Object::Blob(_))) {
                return Err(StoreError::NotFound(format!("blob {}", entry.blob)));
            }
            tree.insert(entry.path.clone(), entry.blob.clone());
        }

        Ok(self.insert(Object::Tree(tree)))
    }

    fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> bool {
        let mut pending = vec![descendant.clone()];
        while let Some(id) = pending.pop() {
            if &id == ancestor {
                return true;
            }
            if let Some(Object::Commit { parents, .. }) = self.objects.get(&id) {
                pending.extend(parents.iter().cloned());
            }
        }
        false
    }
}

fn object_id(object: &Object) -> ObjectId {
    let mut hasher = Sha256::new();
    match object {
        Object::Blob(content) => {
            hasher.update(b"blob\0");
            hasher.update(content);
        }
        Object::Tree(entries) => {
            hasher.update(b"tree\0");
            for (path, blob) in entries {
                hasher.update(path.as_bytes());
                hasher.update(b"\0");
                hasher.update(blob.as_str().as_bytes());
                hasher.update(b"\n");
            }
        }
        Object::Commit {
            tree,
            parents,
            message,
        } => {
            hasher.update(b"commit\0");
            hasher.update(tree.as_str().as_bytes());
            for parent in parents {
                hasher.update(b"\nparent ");
                hasher.update(parent.as_str().as_bytes());
            }
            hasher.update(b"\n\n");
            hasher.update(message.as_bytes());
        }
    }
    ObjectId::new(hex::encode(hasher.finalize()))
}

#[async_trait]
impl VersionedStore for MemoryStore {
    async fn read_branch_tip(&self, branch: &str) -> Result<BranchTip, StoreError> {
        self.repo.lock().tip(branch)
    }

    async fn create_blob(&self, content: &[u8]) -> Result<ObjectId, StoreError> {
        Ok(self.repo.lock().insert(Object::Blob(content.to_vec())))
    }

    async fn create_tree(
        &self,
        base_tree: &ObjectId,
        entries: &[TreeEntry],
    ) -> Result<ObjectId, StoreError> {
        self.repo.lock().extend_tree(base_tree, entries)
    }

    async fn create_commit(
        &self,
        message: &str,
        tree: &ObjectId,
        parents: &[ObjectId],
    ) -> Result<ObjectId, StoreError> {
        let mut repo = self.repo.lock();
        if !matches!(repo.objects.get(tree), Some(Object::Tree(_))) {
            return Err(StoreError::NotFound(format!("tree {tree}")));
        }
        if let Some(missing) = parents
            .iter()
            .find(|parent| !matches!(repo.objects.get(*parent), Some(Object::Commit { .. })))
        {
            return Err(StoreError::NotFound(format!("commit {missing}")));
        }

        Ok(repo.insert(Object::Commit {
            tree: tree.clone(),
            parents: parents.to_vec(),
            message: message.to_string(),
        }))
    }

    async fn update_branch(&self, branch: &str, commit: &ObjectId) -> Result<(), StoreError> {
        let mut repo = self.repo.lock();
        if !matches!(repo.objects.get(commit), Some(Object::Commit { .. })) {
            return Err(StoreError::NotFound(format!("commit {commit}")));
        }

        let current = repo.tip(branch)?.commit;
        if !repo.is_ancestor(&current, commit) {
            return Err(StoreError::NonFastForward {
                branch: branch.to_string(),
            });
        }

        repo.branches.insert(branch.to_string(), commit.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(store: &MemoryStore, path: &str, content: &[u8]) -> Result<ObjectId, StoreError> {
        let tip = store.read_branch_tip("main").await?;
        let blob = store.create_blob(content).await?;
        let tree = store
            .create_tree(
                &tip.tree,
                &[TreeEntry {
                    path: path.to_string(),
                    blob,
                }],
            )
            .await?;
        let commit = store
            .create_commit(&format!("Write {path}"), &tree, &[tip.commit])
            .await?;
        store.update_branch("main", &commit).await?;
        Ok(commit)
    }

    #[tokio::test]
    async fn test_new_store_has_root_commit() {
        let store = MemoryStore::new("main");
        assert_eq!(store.history("main"), vec!["Initial commit"]);
        assert!(store.read_branch_tip("other").await.is_err());
    }

    #[tokio::test]
    async fn test_write_sequence_advances_branch() {
        let store = MemoryStore::new("main");
        write(&store, "notes/a.md", b"alpha").await.unwrap();
        write(&store, "notes/b.md", b"beta").await.unwrap();

        assert_eq!(store.file_at("main", "notes/a.md").as_deref(), Some(&b"alpha"[..]));
        assert_eq!(store.file_at("main", "notes/b.md").as_deref(), Some(&b"beta"[..]));
        assert_eq!(
            store.history("main"),
            vec!["Write notes/b.md", "Write notes/a.md", "Initial commit"]
        );
    }

    #[tokio::test]
    async fn test_blobs_are_content_addressed() {
        let store = MemoryStore::new("main");
        let a = store.create_blob(b"same").await.unwrap();
        let b = store.create_blob(b"same").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[tokio::test]
    async fn test_stale_update_is_not_fast_forward() {
        let store = MemoryStore::new("main");
        let stale = store.read_branch_tip("main").await.unwrap();
        store
            .commit_directly("main", "elsewhere.md", b"moved", "Out of band")
            .unwrap();

        let blob = store.create_blob(b"late").await.unwrap();
        let tree = store
            .create_tree(
                &stale.tree,
                &[TreeEntry {
                    path: "late.md".into(),
                    blob,
                }],
            )
            .await
            .unwrap();
        let commit = store
            .create_commit("Late write", &tree, &[stale.commit])
            .await
            .unwrap();

        assert_eq!(
            store.update_branch("main", &commit).await.unwrap_err(),
            StoreError::NonFastForward {
                branch: "main".into()
            }
        );
        assert!(store.file_at("main", "late.md").is_none());
    }

    #[tokio::test]
    async fn test_tree_rejects_unknown_blob() {
        let store = MemoryStore::new("main");
        let tip = store.read_branch_tip("main").await.unwrap();
        let result = store
            .create_tree(
                &tip.tree,
                &[TreeEntry {
                    path: "ghost.md".into(),
                    blob: ObjectId::new("deadbeef"),
                }],
            )
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
