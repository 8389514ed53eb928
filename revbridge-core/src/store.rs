//! Source repository abstraction
//!
//! The engine never talks to a concrete DAG store directly; it consumes the
//! [`SourceStore`] trait. [`MemorySourceStore`] is the reference
//! implementation used by tests and local experimentation.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, SyncError};
use crate::object::{Blob, Commit, ObjectId, Tree};

/// Read/write access to the content-addressed source repository.
///
/// Objects are immutable: inserting the same content twice yields the same
/// id and is a no-op on the second insert.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Resolve a commit id to the commit object
    async fn commit(&self, id: ObjectId) -> Result<Commit>;

    /// Load a tree object by id
    async fn tree(&self, id: ObjectId) -> Result<Tree>;

    /// Load blob content by id
    async fn blob(&self, id: ObjectId) -> Result<Bytes>;

    /// Insert blob content, returning its id
    async fn insert_blob(&self, data: Bytes) -> Result<ObjectId>;

    /// Insert a tree object, returning its id
    async fn insert_tree(&self, tree: Tree) -> Result<ObjectId>;

    /// Insert a commit object, returning its id
    async fn insert_commit(&self, commit: Commit) -> Result<ObjectId>;

    /// Parent ids of a commit, in declared order
    async fn parents(&self, id: ObjectId) -> Result<Vec<ObjectId>>;

    /// Whether `ancestor` is reachable from `descendant` via parent links
    async fn is_ancestor(&self, ancestor: ObjectId, descendant: ObjectId) -> Result<bool>;
}

/// In-memory source repository.
pub struct MemorySourceStore {
    blobs: Arc<RwLock<HashMap<ObjectId, Bytes>>>,
    trees: Arc<RwLock<HashMap<ObjectId, Tree>>>,
    commits: Arc<RwLock<HashMap<ObjectId, Commit>>>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            trees: Arc::new(RwLock::new(HashMap::new())),
            commits: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored blobs (diagnostic)
    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }
}

impl Default for MemorySourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn commit(&self, id: ObjectId) -> Result<Commit> {
        self.commits
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SyncError::NotFound(id))
    }

    async fn tree(&self, id: ObjectId) -> Result<Tree> {
        self.trees
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SyncError::NotFound(id))
    }

    async fn blob(&self, id: ObjectId) -> Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SyncError::NotFound(id))
    }

    async fn insert_blob(&self, data: Bytes) -> Result<ObjectId> {
        let blob = Blob::new(data.to_vec());
        let id = blob.id();
        self.blobs.write().await.insert(id, data);
        Ok(id)
    }

    async fn insert_tree(&self, tree: Tree) -> Result<ObjectId> {
        let id = tree.id();
        self.trees.write().await.insert(id, tree);
        Ok(id)
    }

    async fn insert_commit(&self, commit: Commit) -> Result<ObjectId> {
        let id = commit.id();
        self.commits.write().await.insert(id, commit);
        Ok(id)
    }

    async fn parents(&self, id: ObjectId) -> Result<Vec<ObjectId>> {
        Ok(self.commit(id).await?.parents)
    }

    async fn is_ancestor(&self, ancestor: ObjectId, descendant: ObjectId) -> Result<bool> {
        // Worklist DFS; histories can be deep, so no recursion here.
        let commits = self.commits.read().await;
        let mut stack = vec![descendant];
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == ancestor {
                return Ok(true);
            }
            if !visited.insert(id) {
                continue;
            }
            let commit = commits.get(&id).ok_or(SyncError::NotFound(id))?;
            stack.extend(commit.parents.iter().copied());
        }
        Ok(false)
    }
}
