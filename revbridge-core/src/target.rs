//! Target system abstraction
//!
//! The centralized side of the bridge: sequential numbered revisions over a
//! case-insensitive path namespace, mutated through per-workspace pending
//! operation sets. [`MemoryTargetService`] is the reference implementation;
//! it enforces the same namespace rules a real service would, so protocol
//! tests catch ordering mistakes.
//!
//! Workspace-scoped calls take paths relative to the workspace root;
//! repository-scoped calls (`snapshot`, `read_item`, `latest_revision`)
//! take a root prefix, and `snapshot` returns paths relative to it.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::diff::Operation;
use crate::error::{Result, SyncError};
use crate::object::{FileMode, ObjectKind};

/// Handle to a disposable workspace scoped to one target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceHandle {
    pub id: Uuid,
    pub root: String,
}

/// One item of a revision snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetItem {
    /// Path relative to the queried prefix
    pub path: String,
    pub mode: FileMode,
    /// Revision at which this item last changed
    pub item_revision: u64,
}

/// Metadata of a committed revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub revision: u64,
    pub owner: String,
    pub comment: String,
    pub timestamp: i64,
}

/// Metadata supplied when committing a pending set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionMeta {
    pub owner: String,
    pub timestamp: i64,
}

/// Client interface of the centralized target system.
#[async_trait]
pub trait TargetService: Send + Sync {
    /// Latest revision that touched `path` (`""` for the whole repository);
    /// `None` when the path never existed.
    async fn latest_revision(&self, path: &str) -> Result<Option<u64>>;

    /// Items under `path` as of `revision`, with per-item revision stamps.
    async fn snapshot(&self, path: &str, revision: u64) -> Result<Vec<TargetItem>>;

    /// Content of one item (full path) as of `revision`.
    async fn read_item(&self, path: &str, revision: u64) -> Result<Bytes>;

    /// Owner/comment/timestamp of a revision.
    async fn revision_info(&self, revision: u64) -> Result<RevisionInfo>;

    /// Create a disposable workspace scoped to `path`.
    async fn create_workspace(&self, path: &str) -> Result<WorkspaceHandle>;

    /// Drop materialized content and stale pending state (best-effort).
    async fn clean(&self, ws: &WorkspaceHandle) -> Result<()>;

    /// Write file content into the workspace ahead of pending it.
    async fn materialize(
        &self,
        ws: &WorkspaceHandle,
        path: &str,
        data: Bytes,
        mode: FileMode,
    ) -> Result<()>;

    /// Queue operations; order is preserved.
    async fn pend(&self, ws: &WorkspaceHandle, ops: &[Operation]) -> Result<()>;

    /// Pending operations whose path starts with `prefix` (workspace-relative).
    async fn query_pending(&self, ws: &WorkspaceHandle, prefix: &str) -> Result<Vec<Operation>>;

    /// Atomically commit the given pending operations as one new revision.
    async fn commit(
        &self,
        ws: &WorkspaceHandle,
        ops: &[Operation],
        comment: &str,
        meta: &RevisionMeta,
    ) -> Result<u64>;

    /// Take the exclusive lock on `path`.
    async fn lock(&self, ws: &WorkspaceHandle, path: &str) -> Result<()>;

    /// Release the exclusive lock on `path`.
    async fn unlock(&self, ws: &WorkspaceHandle, path: &str) -> Result<()>;

    /// Dispose the workspace and everything queued in it.
    async fn dispose_workspace(&self, ws: WorkspaceHandle) -> Result<()>;
}

fn ci_eq(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn ci_under(path: &str, folder: &str) -> bool {
    !folder.is_empty()
        && path.len() > folder.len()
        && path.as_bytes()[folder.len()] == b'/'
        && ci_eq(&path[..folder.len()], folder)
}

fn ci_within(path: &str, prefix: &str) -> bool {
    prefix.is_empty() || ci_eq(path, prefix) || ci_under(path, prefix)
}

fn join(root: &str, rel: &str) -> String {
    if root.is_empty() {
        rel.to_string()
    } else if rel.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, rel)
    }
}

#[derive(Debug, Clone)]
struct ItemRecord {
    data: Bytes,
    mode: FileMode,
    item_revision: u64,
}

#[derive(Debug, Clone)]
struct RevisionRecord {
    info: RevisionInfo,
    /// Full repository state at this revision, keyed by absolute path
    items: BTreeMap<String, ItemRecord>,
    /// Absolute paths the revision's operations landed on
    touched: Vec<String>,
}

struct WorkspaceState {
    root: String,
    pending: Vec<Operation>,
    /// Materialized content keyed by workspace-relative path
    scratch: HashMap<String, (Bytes, FileMode)>,
}

/// In-memory target service.
pub struct MemoryTargetService {
    revisions: Arc<RwLock<Vec<RevisionRecord>>>,
    workspaces: Arc<RwLock<HashMap<Uuid, WorkspaceState>>>,
    lock_holder: Arc<RwLock<Option<(Uuid, String)>>>,
}

impl MemoryTargetService {
    pub fn new() -> Self {
        Self {
            revisions: Arc::new(RwLock::new(Vec::new())),
            workspaces: Arc::new(RwLock::new(HashMap::new())),
            lock_holder: Arc::new(RwLock::new(None)),
        }
    }

    /// Commit a revision directly, bypassing any workspace — the moral
    /// equivalent of another client writing to the same repository.
    /// `None` content deletes the path.
    pub async fn commit_external(
        &self,
        changes: &[(String, Option<(Bytes, FileMode)>)],
        owner: &str,
        comment: &str,
    ) -> Result<u64> {
        let mut revisions = self.revisions.write().await;
        let mut items = revisions
            .last()
            .map(|r| r.items.clone())
            .unwrap_or_default();
        let revision = revisions.len() as u64 + 1;
        let mut touched = Vec::new();
        for (path, change) in changes {
            touched.push(path.clone());
            match change {
                Some((data, mode)) => {
                    items.retain(|p, _| !ci_eq(p, path));
                    items.insert(
                        path.clone(),
                        ItemRecord {
                            data: data.clone(),
                            mode: *mode,
                            item_revision: revision,
                        },
                    );
                }
                None => {
                    items.retain(|p, _| !ci_eq(p, path) && !ci_under(p, path));
                }
            }
        }
        revisions.push(RevisionRecord {
            info: RevisionInfo {
                revision,
                owner: owner.to_string(),
                comment: comment.to_string(),
                timestamp: chrono::Utc::now().timestamp(),
            },
            items,
            touched,
        });
        Ok(revision)
    }

    fn apply_ops(
        root: &str,
        base: &BTreeMap<String, ItemRecord>,
        scratch: &HashMap<String, (Bytes, FileMode)>,
        ops: &[Operation],
        revision: u64,
    ) -> Result<(BTreeMap<String, ItemRecord>, Vec<String>)> {
        let mut items = base.clone();
        let mut touched = Vec::new();

        let scratch_get = |rel: &str| -> Option<(Bytes, FileMode)> {
            scratch
                .iter()
                .find(|(p, _)| ci_eq(p, rel))
                .map(|(_, v)| v.clone())
        };

        for op in ops {
            match op {
                Operation::Delete(del) => {
                    let full = join(root, &del.path);
                    let before = items.len();
                    items.retain(|p, _| !ci_eq(p, &full) && !ci_under(p, &full));
                    if items.len() == before && del.kind != ObjectKind::Tree {
                        return Err(SyncError::PendRejected(format!(
                            "delete of missing item '{}'",
                            full
                        )));
                    }
                    touched.push(full);
                }
                Operation::Edit(edit) => {
                    let full = join(root, &edit.path);
                    let existing: Vec<String> = items
                        .keys()
                        .filter(|p| ci_eq(p, &full))
                        .cloned()
                        .collect();
                    if existing.is_empty() {
                        return Err(SyncError::PendRejected(format!(
                            "edit of missing item '{}'",
                            full
                        )));
                    }
                    let (data, mode) = scratch_get(&edit.path).ok_or_else(|| {
                        SyncError::PendRejected(format!(
                            "edit of '{}' has no materialized content",
                            full
                        ))
                    })?;
                    for key in existing {
                        items.remove(&key);
                    }
                    items.insert(
                        full.clone(),
                        ItemRecord {
                            data,
                            mode,
                            item_revision: revision,
                        },
                    );
                    touched.push(full);
                }
                Operation::Add(add) => {
                    let full = join(root, &add.path);
                    if add.kind != ObjectKind::Blob {
                        // Folders exist implicitly; an empty-folder add only
                        // marks the path as touched.
                        touched.push(full);
                        continue;
                    }
                    if items.keys().any(|p| ci_eq(p, &full)) {
                        return Err(SyncError::PendRejected(format!(
                            "add collides with existing item '{}'",
                            full
                        )));
                    }
                    let (data, mode) = scratch_get(&add.path).ok_or_else(|| {
                        SyncError::PendRejected(format!(
                            "add of '{}' has no materialized content",
                            full
                        ))
                    })?;
                    items.insert(
                        full.clone(),
                        ItemRecord {
                            data,
                            mode,
                            item_revision: revision,
                        },
                    );
                    touched.push(full);
                }
                Operation::Rename(ren) => {
                    let old_full = join(root, &ren.old_path);
                    let new_full = join(root, &ren.new_path);
                    let moved: Vec<(String, ItemRecord)> = items
                        .iter()
                        .filter(|(p, _)| ci_eq(p, &old_full) || ci_under(p, &old_full))
                        .map(|(p, r)| (p.clone(), r.clone()))
                        .collect();
                    if moved.is_empty() {
                        return Err(SyncError::PendRejected(format!(
                            "rename of missing path '{}'",
                            old_full
                        )));
                    }
                    for (path, mut record) in moved {
                        items.remove(&path);
                        let target = if ci_eq(&path, &old_full) {
                            if ren.content.is_some() {
                                if let Some((data, mode)) = scratch_get(&ren.new_path) {
                                    record.data = data;
                                    record.mode = mode;
                                }
                            }
                            new_full.clone()
                        } else {
                            format!("{}{}", new_full, &path[old_full.len()..])
                        };
                        record.item_revision = revision;
                        items.insert(target, record);
                    }
                    touched.push(old_full);
                    touched.push(new_full);
                }
            }
        }

        Ok((items, touched))
    }
}

impl Default for MemoryTargetService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetService for MemoryTargetService {
    async fn latest_revision(&self, path: &str) -> Result<Option<u64>> {
        let revisions = self.revisions.read().await;
        if path.is_empty() {
            return Ok((!revisions.is_empty()).then(|| revisions.len() as u64));
        }
        for record in revisions.iter().rev() {
            if record.touched.iter().any(|t| ci_within(t, path) || ci_within(path, t)) {
                return Ok(Some(record.info.revision));
            }
        }
        Ok(None)
    }

    async fn snapshot(&self, path: &str, revision: u64) -> Result<Vec<TargetItem>> {
        let revisions = self.revisions.read().await;
        if revision == 0 {
            return Ok(Vec::new());
        }
        let record = revisions
            .get(revision as usize - 1)
            .ok_or(SyncError::RevisionNotFound(revision))?;
        Ok(record
            .items
            .iter()
            .filter(|(p, _)| ci_within(p, path))
            .map(|(p, item)| TargetItem {
                path: if path.is_empty() {
                    p.clone()
                } else if p.len() > path.len() {
                    p[path.len() + 1..].to_string()
                } else {
                    String::new()
                },
                mode: item.mode,
                item_revision: item.item_revision,
            })
            .collect())
    }

    async fn read_item(&self, path: &str, revision: u64) -> Result<Bytes> {
        let revisions = self.revisions.read().await;
        let record = revisions
            .get(revision.checked_sub(1).ok_or(SyncError::RevisionNotFound(0))? as usize)
            .ok_or(SyncError::RevisionNotFound(revision))?;
        record
            .items
            .iter()
            .find(|(p, _)| ci_eq(p, path))
            .map(|(_, item)| item.data.clone())
            .ok_or_else(|| SyncError::Target(format!("no item '{}' at revision {}", path, revision)))
    }

    async fn revision_info(&self, revision: u64) -> Result<RevisionInfo> {
        let revisions = self.revisions.read().await;
        revisions
            .get(revision.checked_sub(1).ok_or(SyncError::RevisionNotFound(0))? as usize)
            .map(|r| r.info.clone())
            .ok_or(SyncError::RevisionNotFound(revision))
    }

    async fn create_workspace(&self, path: &str) -> Result<WorkspaceHandle> {
        let handle = WorkspaceHandle {
            id: Uuid::new_v4(),
            root: path.to_string(),
        };
        self.workspaces.write().await.insert(
            handle.id,
            WorkspaceState {
                root: path.to_string(),
                pending: Vec::new(),
                scratch: HashMap::new(),
            },
        );
        Ok(handle)
    }

    async fn clean(&self, ws: &WorkspaceHandle) -> Result<()> {
        let mut workspaces = self.workspaces.write().await;
        let state = workspaces
            .get_mut(&ws.id)
            .ok_or_else(|| SyncError::Target("workspace disposed".to_string()))?;
        state.pending.clear();
        state.scratch.clear();
        Ok(())
    }

    async fn materialize(
        &self,
        ws: &WorkspaceHandle,
        path: &str,
        data: Bytes,
        mode: FileMode,
    ) -> Result<()> {
        let mut workspaces = self.workspaces.write().await;
        let state = workspaces
            .get_mut(&ws.id)
            .ok_or_else(|| SyncError::Target("workspace disposed".to_string()))?;
        state.scratch.insert(path.to_string(), (data, mode));
        Ok(())
    }

    async fn pend(&self, ws: &WorkspaceHandle, ops: &[Operation]) -> Result<()> {
        let mut workspaces = self.workspaces.write().await;
        let state = workspaces
            .get_mut(&ws.id)
            .ok_or_else(|| SyncError::Target("workspace disposed".to_string()))?;
        state.pending.extend(ops.iter().cloned());
        Ok(())
    }

    async fn query_pending(&self, ws: &WorkspaceHandle, prefix: &str) -> Result<Vec<Operation>> {
        let workspaces = self.workspaces.read().await;
        let state = workspaces
            .get(&ws.id)
            .ok_or_else(|| SyncError::Target("workspace disposed".to_string()))?;
        Ok(state
            .pending
            .iter()
            .filter(|op| ci_within(op.path(), prefix))
            .cloned()
            .collect())
    }

    async fn commit(
        &self,
        ws: &WorkspaceHandle,
        ops: &[Operation],
        comment: &str,
        meta: &RevisionMeta,
    ) -> Result<u64> {
        let mut revisions = self.revisions.write().await;
        let mut workspaces = self.workspaces.write().await;
        let state = workspaces
            .get_mut(&ws.id)
            .ok_or_else(|| SyncError::Target("workspace disposed".to_string()))?;

        let base = revisions
            .last()
            .map(|r| r.items.clone())
            .unwrap_or_default();
        let revision = revisions.len() as u64 + 1;
        let (items, touched) = Self::apply_ops(&state.root, &base, &state.scratch, ops, revision)?;

        revisions.push(RevisionRecord {
            info: RevisionInfo {
                revision,
                owner: meta.owner.clone(),
                comment: comment.to_string(),
                timestamp: meta.timestamp,
            },
            items,
            touched,
        });
        state.pending.clear();
        state.scratch.clear();
        Ok(revision)
    }

    async fn lock(&self, ws: &WorkspaceHandle, path: &str) -> Result<()> {
        let mut holder = self.lock_holder.write().await;
        match holder.as_ref() {
            Some((id, held)) if *id != ws.id => Err(SyncError::Target(format!(
                "path '{}' is locked by another workspace",
                held
            ))),
            _ => {
                *holder = Some((ws.id, path.to_string()));
                Ok(())
            }
        }
    }

    async fn unlock(&self, ws: &WorkspaceHandle, _path: &str) -> Result<()> {
        let mut holder = self.lock_holder.write().await;
        match holder.as_ref() {
            Some((id, _)) if *id == ws.id => {
                *holder = None;
                Ok(())
            }
            _ => Err(SyncError::Target("lock not held by this workspace".to_string())),
        }
    }

    async fn dispose_workspace(&self, ws: WorkspaceHandle) -> Result<()> {
        self.workspaces.write().await.remove(&ws.id);
        let mut holder = self.lock_holder.write().await;
        if matches!(holder.as_ref(), Some((id, _)) if *id == ws.id) {
            *holder = None;
        }
        Ok(())
    }
}
