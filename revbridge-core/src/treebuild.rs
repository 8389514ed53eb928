//! Hierarchical tree builder
//!
//! Rebuilds a content-addressed tree hierarchy from the flat path listing a
//! target revision provides. Folders are serialized deepest-first so every
//! child id exists before its parent tree is hashed.
//!
//! Folders with zero entries are materialized as canonical empty-tree
//! objects rather than omitted; in particular an empty input yields the
//! empty root tree.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::object::{FileMode, ObjectId, Tree, TreeEntry};
use crate::snapshot::file_name;
use crate::store::SourceStore;

/// One file of the flat listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    /// Slash-separated path relative to the root
    pub path: String,
    /// Blob id of the file content
    pub content: ObjectId,
    pub mode: FileMode,
}

impl TreeFile {
    pub fn new(path: impl Into<String>, content: ObjectId, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            content,
            mode,
        }
    }
}

/// Accumulates the folder → entries map for one build pass.
///
/// A single owned value threaded through the traversal; the folder map is
/// keyed by full folder path with the root at the empty string.
struct TreeAssembly {
    folders: BTreeMap<String, Tree>,
}

impl TreeAssembly {
    fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert(String::new(), Tree::new());
        Self { folders }
    }

    /// Make sure `folder` and every ancestor has an entry set.
    fn ensure_folder(&mut self, folder: &str) {
        let mut current = folder;
        loop {
            if current.is_empty() || self.folders.contains_key(current) {
                return;
            }
            self.folders.insert(current.to_string(), Tree::new());
            match current.rsplit_once('/') {
                Some((parent, _)) => current = parent,
                None => return,
            }
        }
    }

    fn add_file(&mut self, file: &TreeFile) {
        let (folder, name) = match file.path.rsplit_once('/') {
            Some((folder, name)) => (folder, name),
            None => ("", file.path.as_str()),
        };
        self.ensure_folder(folder);
        self.folders
            .get_mut(folder)
            .expect("folder ensured above")
            .insert(TreeEntry::blob(name, file.content, file.mode));
    }

    /// Serialize all folders deepest-first and return the root tree id.
    ///
    /// Reverse lexicographic order over full folder paths visits every
    /// descendant before its parent, so child ids are always known when the
    /// parent is hashed.
    async fn finish<S: SourceStore + ?Sized>(mut self, store: &S) -> Result<ObjectId> {
        let keys: Vec<String> = self.folders.keys().rev().cloned().collect();
        let mut root_id = None;
        for key in keys {
            let tree = self.folders.remove(&key).expect("key taken from folder map");
            let id = store.insert_tree(tree).await?;
            if key.is_empty() {
                root_id = Some(id);
            } else {
                let parent = key.rsplit_once('/').map_or("", |(parent, _)| parent);
                self.folders
                    .get_mut(parent)
                    .expect("ancestors exist for every folder")
                    .insert(TreeEntry::tree(file_name(&key), id));
            }
        }
        Ok(root_id.expect("root folder always present"))
    }
}

/// Build (and insert) the tree hierarchy for a flat file listing, returning
/// the root tree id.
pub async fn build_tree<S: SourceStore + ?Sized>(
    store: &S,
    files: &[TreeFile],
) -> Result<ObjectId> {
    let mut assembly = TreeAssembly::new();
    for file in files {
        assembly.add_file(file);
    }
    assembly.finish(store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use crate::snapshot::Snapshot;
    use crate::store::MemorySourceStore;
    use bytes::Bytes;

    async fn blob(store: &MemorySourceStore, data: &[u8]) -> ObjectId {
        store.insert_blob(Bytes::copy_from_slice(data)).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_input_builds_empty_root() {
        let store = MemorySourceStore::new();
        let root = build_tree(&store, &[]).await.unwrap();
        assert_eq!(root, Tree::new().id());
        assert!(store.tree(root).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nested_build_matches_flat_listing() {
        let store = MemorySourceStore::new();
        let a = blob(&store, b"a").await;
        let b = blob(&store, b"b").await;
        let c = blob(&store, b"c").await;

        let files = vec![
            TreeFile::new("src/lib.rs", a, FileMode::Regular),
            TreeFile::new("src/bin/main.rs", b, FileMode::Regular),
            TreeFile::new("run.sh", c, FileMode::Executable),
        ];
        let root = build_tree(&store, &files).await.unwrap();

        let snap = Snapshot::load(&store, root).await.unwrap();
        assert_eq!(snap.get("src/lib.rs").unwrap().id, a);
        assert_eq!(snap.get("src/bin/main.rs").unwrap().id, b);
        assert_eq!(snap.get("run.sh").unwrap().mode, FileMode::Executable);
        assert_eq!(snap.get("src").unwrap().kind, ObjectKind::Tree);
        assert_eq!(snap.get("src/bin").unwrap().kind, ObjectKind::Tree);
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let store = MemorySourceStore::new();
        let a = blob(&store, b"a").await;
        let b = blob(&store, b"b").await;

        let forward = vec![
            TreeFile::new("x/one", a, FileMode::Regular),
            TreeFile::new("x/two", b, FileMode::Regular),
        ];
        let backward: Vec<TreeFile> = forward.iter().rev().cloned().collect();

        let r1 = build_tree(&store, &forward).await.unwrap();
        let r2 = build_tree(&store, &backward).await.unwrap();
        assert_eq!(r1, r2);
    }

    #[tokio::test]
    async fn test_shared_subtrees_share_ids() {
        let store = MemorySourceStore::new();
        let a = blob(&store, b"same").await;

        let one = build_tree(
            &store,
            &[TreeFile::new("lib/util.rs", a, FileMode::Regular)],
        )
        .await
        .unwrap();
        let two = build_tree(
            &store,
            &[
                TreeFile::new("lib/util.rs", a, FileMode::Regular),
                TreeFile::new("extra.txt", a, FileMode::Regular),
            ],
        )
        .await
        .unwrap();

        let t1 = store.tree(one).await.unwrap();
        let t2 = store.tree(two).await.unwrap();
        assert_eq!(t1.get("lib").unwrap().id, t2.get("lib").unwrap().id);
    }
}
