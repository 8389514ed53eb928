//! Flattened view of a tree snapshot
//!
//! The differ walks two snapshots in sorted-path order, so the recursive
//! tree structure is flattened once up front: every file and folder appears
//! under its full slash-separated path. Folder entries are kept so that
//! kind changes at the same path (file↔folder) are visible to the walk.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::object::{FileMode, ObjectId, ObjectKind};
use crate::store::SourceStore;

/// One entry of a flattened snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub mode: FileMode,
}

/// A fully materialized, flattened tree snapshot.
///
/// Paths are relative, slash-separated, and never empty; the root itself
/// has no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, SnapshotEntry>,
}

impl Snapshot {
    /// Snapshot with no entries (the empty tree)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from already-flattened entries.
    pub fn from_entries(entries: BTreeMap<String, SnapshotEntry>) -> Self {
        Self { entries }
    }

    /// Load and flatten the tree rooted at `root`.
    pub async fn load<S: SourceStore + ?Sized>(store: &S, root: ObjectId) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut worklist: Vec<(String, ObjectId)> = vec![(String::new(), root)];
        while let Some((prefix, tree_id)) = worklist.pop() {
            let tree = store.tree(tree_id).await?;
            for entry in tree.iter() {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if entry.kind == ObjectKind::Tree {
                    worklist.push((path.clone(), entry.id));
                }
                entries.insert(
                    path,
                    SnapshotEntry {
                        id: entry.id,
                        kind: entry.kind,
                        mode: entry.mode,
                    },
                );
            }
        }
        Ok(Self { entries })
    }

    /// Load the snapshot of a commit's root tree.
    pub async fn of_commit<S: SourceStore + ?Sized>(store: &S, commit: ObjectId) -> Result<Self> {
        let commit = store.commit(commit).await?;
        Self::load(store, commit.tree).await
    }

    /// All entries keyed by full path, in sorted-path order
    pub fn entries(&self) -> &BTreeMap<String, SnapshotEntry> {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry lives strictly below `path`
    pub fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(p, _)| p.starts_with(&prefix))
    }

    /// Iterate over blob entries only
    pub fn files(&self) -> impl Iterator<Item = (&String, &SnapshotEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.kind == ObjectKind::Blob)
    }
}

/// Containing folder of a path, or `None` at the top level.
pub(crate) fn parent_folder(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(dir, _)| dir)
}

/// Final path segment.
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Tree, TreeEntry};
    use crate::store::MemorySourceStore;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_load_flattens_nested_trees() {
        let store = MemorySourceStore::new();
        let blob = store.insert_blob(Bytes::from_static(b"x")).await.unwrap();

        let mut inner = Tree::new();
        inner.insert(TreeEntry::blob("file.txt", blob, FileMode::Regular));
        let inner_id = store.insert_tree(inner).await.unwrap();

        let mut root = Tree::new();
        root.insert(TreeEntry::tree("docs", inner_id));
        root.insert(TreeEntry::blob("top", blob, FileMode::Executable));
        let root_id = store.insert_tree(root).await.unwrap();

        let snap = Snapshot::load(&store, root_id).await.unwrap();
        assert_eq!(snap.entries().len(), 3);
        assert_eq!(snap.get("docs").unwrap().kind, ObjectKind::Tree);
        assert_eq!(snap.get("docs/file.txt").unwrap().id, blob);
        assert_eq!(snap.get("top").unwrap().mode, FileMode::Executable);
        assert!(snap.has_children("docs"));
        assert!(!snap.has_children("top"));
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_folder("a/b/c"), Some("a/b"));
        assert_eq!(parent_folder("a"), None);
        assert_eq!(file_name("a/b/c"), "c");
        assert_eq!(file_name("a"), "a");
    }
}
