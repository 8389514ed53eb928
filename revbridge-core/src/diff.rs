//! Tree difference analyzer
//!
//! Computes the path-level operation set that transforms one snapshot into
//! another. The target system's namespace is case-insensitive and has no
//! native notion of a commit, so the analyzer has to express case-only
//! renames and blob↔tree swaps as operation sequences the target will
//! accept without transient collisions.
//!
//! Operations must be submitted in Delete → Edit → Add → Rename order:
//! deletes vacate a path before an add or rename re-occupies it under a
//! different case or type.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, SyncError};
use crate::object::{FileMode, ObjectId, ObjectKind};
use crate::snapshot::{Snapshot, file_name, parent_folder};

/// Pend an item that does not exist at the prior revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOp {
    pub path: String,
    pub content: ObjectId,
    pub kind: ObjectKind,
    pub mode: FileMode,
}

/// Replace content and/or mode of an existing item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOp {
    pub path: String,
    pub content: ObjectId,
    /// False when only the mode changed
    pub content_modified: bool,
    pub old_mode: FileMode,
    pub new_mode: FileMode,
}

/// Remove an item (and, for trees, everything below it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOp {
    pub path: String,
    pub kind: ObjectKind,
}

/// Move an item to a path that differs only in case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOp {
    pub old_path: String,
    pub new_path: String,
    /// New content for file-level renames; folder renames carry none
    pub content: Option<ObjectId>,
    /// True when the leaf name kept its casing and only an ancestor folder
    /// changed case
    pub parent_only: bool,
}

/// One pending operation against the target namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Add(AddOp),
    Edit(EditOp),
    Delete(DeleteOp),
    Rename(RenameOp),
}

impl Operation {
    /// Path the operation lands on (new path for renames)
    pub fn path(&self) -> &str {
        match self {
            Operation::Add(op) => &op.path,
            Operation::Edit(op) => &op.path,
            Operation::Delete(op) => &op.path,
            Operation::Rename(op) => &op.new_path,
        }
    }
}

/// Classified result of diffing two snapshots.
#[derive(Debug, Clone, Default)]
pub struct TreeDiff {
    pub adds: Vec<AddOp>,
    pub edits: Vec<EditOp>,
    pub deletes: Vec<DeleteOp>,
    pub renames: Vec<RenameOp>,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.edits.is_empty()
            && self.deletes.is_empty()
            && self.renames.is_empty()
    }

    /// Total operation count
    pub fn len(&self) -> usize {
        self.adds.len() + self.edits.len() + self.deletes.len() + self.renames.len()
    }

    /// Operations in the fixed submission order: Delete → Edit → Add → Rename.
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops = Vec::with_capacity(self.len());
        ops.extend(self.deletes.iter().cloned().map(Operation::Delete));
        ops.extend(self.edits.iter().cloned().map(Operation::Edit));
        ops.extend(self.adds.iter().cloned().map(Operation::Add));
        ops.extend(self.renames.iter().cloned().map(Operation::Rename));
        ops
    }
}

/// Compute the operation set transforming `from` into `to`.
///
/// A `None` from-side means the empty tree (initial synchronization).
/// Fails with [`SyncError::CaseCollision`] if `to` holds two distinct paths
/// that the case-insensitive target would consider equal.
pub fn diff_snapshots(from: Option<&Snapshot>, to: &Snapshot) -> Result<TreeDiff> {
    check_case_collisions(to)?;

    let empty = Snapshot::empty();
    let from = from.unwrap_or(&empty);

    let mut walk = Walk {
        from,
        to,
        adds: Vec::new(),
        edits: Vec::new(),
        deletes: Vec::new(),
        renamed_folders: OrderedSet::new(),
        deleted_folders: OrderedSet::new(),
        deleted_tree_roots: Vec::new(),
    };
    walk.run();

    let Walk {
        mut adds,
        mut edits,
        mut deletes,
        renamed_folders,
        deleted_folders,
        ..
    } = walk;

    let mut renames = Vec::new();

    // Case-rename extraction only applies when the walk produced both sides
    // of a potential pair.
    if !adds.is_empty() && !deletes.is_empty() {
        extract_file_renames(from, &mut adds, &mut deletes, &mut edits, &mut renames);
        extract_folder_renames(
            to,
            &renamed_folders,
            &deleted_folders,
            &mut deletes,
            &mut renames,
        );
    }

    Ok(TreeDiff {
        adds,
        edits,
        deletes,
        renames,
    })
}

fn check_case_collisions(to: &Snapshot) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for path in to.entries().keys() {
        if let Some(first) = seen.insert(path.to_lowercase(), path) {
            return Err(SyncError::CaseCollision {
                first: first.to_string(),
                second: path.clone(),
            });
        }
    }
    Ok(())
}

/// Insertion-ordered string set; iteration order is first-seen order so the
/// extraction passes stay deterministic.
struct OrderedSet {
    items: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedSet {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn insert(&mut self, value: &str) {
        if self.seen.insert(value.to_string()) {
            self.items.push(value.to_string());
        }
    }

    fn iter(&self) -> impl Iterator<Item = &String> {
        self.items.iter()
    }
}

struct Walk<'a> {
    from: &'a Snapshot,
    to: &'a Snapshot,
    adds: Vec<AddOp>,
    edits: Vec<EditOp>,
    deletes: Vec<DeleteOp>,
    /// Folders that received at least one add, in to-side casing
    renamed_folders: OrderedSet,
    /// Folders that lost at least one item, in from-side casing
    deleted_folders: OrderedSet,
    /// Tree paths already deleted wholesale by a type swap; descendants of
    /// these need no per-leaf deletes
    deleted_tree_roots: Vec<String>,
}

impl Walk<'_> {
    /// Synchronized sorted-path walk: entries sharing a path are compared
    /// as a pair, everything else is a one-sided visit.
    fn run(&mut self) {
        let mut fi = self.from.entries().iter().peekable();
        let mut ti = self.to.entries().iter().peekable();
        loop {
            match (fi.peek(), ti.peek()) {
                (None, None) => break,
                (Some(_), None) => {
                    let (path, entry) = fi.next().unwrap();
                    self.removed(path, *entry);
                }
                (None, Some(_)) => {
                    let (path, entry) = ti.next().unwrap();
                    self.added(path, *entry);
                }
                (Some((fp, _)), Some((tp, _))) => match fp.cmp(tp) {
                    std::cmp::Ordering::Less => {
                        let (path, entry) = fi.next().unwrap();
                        self.removed(path, *entry);
                    }
                    std::cmp::Ordering::Greater => {
                        let (path, entry) = ti.next().unwrap();
                        self.added(path, *entry);
                    }
                    std::cmp::Ordering::Equal => {
                        let (path, fe) = fi.next().unwrap();
                        let (_, te) = ti.next().unwrap();
                        self.changed(path, *fe, *te);
                    }
                },
            }
        }
    }

    fn added(&mut self, path: &str, entry: crate::snapshot::SnapshotEntry) {
        match entry.kind {
            ObjectKind::Blob => {
                self.adds.push(AddOp {
                    path: path.to_string(),
                    content: entry.id,
                    kind: ObjectKind::Blob,
                    mode: entry.mode,
                });
                self.note_renamed_parent(path);
            }
            // Non-empty folders are implied by their children on the target
            // side; only an empty folder needs its own add.
            ObjectKind::Tree => {
                if !self.to.has_children(path) {
                    self.adds.push(AddOp {
                        path: path.to_string(),
                        content: entry.id,
                        kind: ObjectKind::Tree,
                        mode: FileMode::Regular,
                    });
                    self.note_renamed_parent(path);
                }
            }
            ObjectKind::Commit => {}
        }
    }

    fn removed(&mut self, path: &str, entry: crate::snapshot::SnapshotEntry) {
        if self.under_deleted_root(path) {
            return;
        }
        match entry.kind {
            ObjectKind::Blob => {
                self.deletes.push(DeleteOp {
                    path: path.to_string(),
                    kind: ObjectKind::Blob,
                });
                self.note_deleted_parent(path);
            }
            ObjectKind::Tree => {
                if !self.from.has_children(path) {
                    self.deletes.push(DeleteOp {
                        path: path.to_string(),
                        kind: ObjectKind::Tree,
                    });
                    self.note_deleted_parent(path);
                }
                // Non-empty vanished folders are consolidated from their
                // children's deletes in the folder pass.
            }
            ObjectKind::Commit => {}
        }
    }

    fn changed(
        &mut self,
        path: &str,
        fe: crate::snapshot::SnapshotEntry,
        te: crate::snapshot::SnapshotEntry,
    ) {
        match (fe.kind, te.kind) {
            (ObjectKind::Blob, ObjectKind::Blob) => {
                if fe.id != te.id || fe.mode != te.mode {
                    self.edits.push(EditOp {
                        path: path.to_string(),
                        content: te.id,
                        content_modified: fe.id != te.id,
                        old_mode: fe.mode,
                        new_mode: te.mode,
                    });
                }
            }
            (ObjectKind::Tree, ObjectKind::Tree) => {}
            (ObjectKind::Tree, ObjectKind::Blob) => {
                // Type swap: one delete covers the whole old subtree.
                self.deletes.push(DeleteOp {
                    path: path.to_string(),
                    kind: ObjectKind::Tree,
                });
                self.deleted_tree_roots.push(path.to_string());
                self.adds.push(AddOp {
                    path: path.to_string(),
                    content: te.id,
                    kind: ObjectKind::Blob,
                    mode: te.mode,
                });
                self.note_renamed_parent(path);
            }
            (ObjectKind::Blob, ObjectKind::Tree) => {
                self.deletes.push(DeleteOp {
                    path: path.to_string(),
                    kind: ObjectKind::Blob,
                });
                self.note_deleted_parent(path);
                if !self.to.has_children(path) {
                    self.adds.push(AddOp {
                        path: path.to_string(),
                        content: te.id,
                        kind: ObjectKind::Tree,
                        mode: FileMode::Regular,
                    });
                }
                // New files under the path arrive as ordinary adds.
            }
            _ => {}
        }
    }

    fn note_renamed_parent(&mut self, path: &str) {
        if let Some(folder) = parent_folder(path) {
            self.renamed_folders.insert(folder);
        }
    }

    fn note_deleted_parent(&mut self, path: &str) {
        if let Some(folder) = parent_folder(path) {
            self.deleted_folders.insert(folder);
        }
    }

    fn under_deleted_root(&self, path: &str) -> bool {
        self.deleted_tree_roots
            .iter()
            .any(|root| path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/')
    }
}

/// Pass A: convert (Add, Delete) pairs that are equal case-insensitively
/// into renames. New collections are built from the old ones; nothing is
/// removed from a list while it is being iterated.
fn extract_file_renames(
    from: &Snapshot,
    adds: &mut Vec<AddOp>,
    deletes: &mut Vec<DeleteOp>,
    edits: &mut Vec<EditOp>,
    renames: &mut Vec<RenameOp>,
) {
    let mut deletes_by_lower: HashMap<String, usize> = HashMap::new();
    for (i, del) in deletes.iter().enumerate() {
        // Duplicate lowercase keys keep the first in walk order.
        deletes_by_lower.entry(del.path.to_lowercase()).or_insert(i);
    }

    let mut rename_seen: HashSet<String> = renames
        .iter()
        .map(|r| r.old_path.to_lowercase())
        .collect();
    let mut consumed_adds: HashSet<usize> = HashSet::new();
    let mut consumed_deletes: HashSet<usize> = HashSet::new();
    let mut extra_edits: Vec<EditOp> = Vec::new();

    for (ai, add) in adds.iter().enumerate() {
        let lower = add.path.to_lowercase();
        let Some(&di) = deletes_by_lower.get(&lower) else {
            continue;
        };
        if consumed_deletes.contains(&di) {
            continue;
        }
        let del = &deletes[di];
        if del.path == add.path || del.kind != add.kind {
            continue;
        }

        if file_name(&del.path) == file_name(&add.path) {
            // Only ancestor casing changed; the rename happens at folder
            // level so siblings move together.
            if let (Some(old_dir), Some(new_dir)) =
                (parent_folder(&del.path), parent_folder(&add.path))
            {
                push_case_renames(old_dir, new_dir, renames, &mut rename_seen);
            }
            // The folder rename carries no content, so a simultaneous
            // content or mode change still needs an edit.
            if add.kind == ObjectKind::Blob {
                if let Some(old) = from.get(&del.path) {
                    if old.id != add.content || old.mode != add.mode {
                        extra_edits.push(EditOp {
                            path: add.path.clone(),
                            content: add.content,
                            content_modified: old.id != add.content,
                            old_mode: old.mode,
                            new_mode: add.mode,
                        });
                    }
                }
            }
        } else if rename_seen.insert(lower) {
            renames.push(RenameOp {
                old_path: del.path.clone(),
                new_path: add.path.clone(),
                content: (add.kind == ObjectKind::Blob).then_some(add.content),
                parent_only: false,
            });
        }

        consumed_adds.insert(ai);
        consumed_deletes.insert(di);
    }

    *adds = std::mem::take(adds)
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !consumed_adds.contains(i))
        .map(|(_, op)| op)
        .collect();
    *deletes = std::mem::take(deletes)
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !consumed_deletes.contains(i))
        .map(|(_, op)| op)
        .collect();
    edits.extend(extra_edits);
}

/// Pass B: match candidate-deleted folders against candidate-renamed
/// folders; unmatched vanished folders collapse their per-leaf deletes into
/// a single folder delete at the shallowest ancestor that is gone entirely.
fn extract_folder_renames(
    to: &Snapshot,
    renamed_folders: &OrderedSet,
    deleted_folders: &OrderedSet,
    deletes: &mut Vec<DeleteOp>,
    renames: &mut Vec<RenameOp>,
) {
    let mut rename_seen: HashSet<String> = renames
        .iter()
        .map(|r| r.old_path.to_lowercase())
        .collect();
    let mut consolidated: HashSet<String> = HashSet::new();

    for folder in deleted_folders.iter() {
        let lower = folder.to_lowercase();
        if let Some(renamed) = renamed_folders.iter().find(|r| r.to_lowercase() == lower) {
            if renamed != folder {
                push_case_renames(folder, renamed, renames, &mut rename_seen);
            }
            // The rename supersedes a plain delete of the folder itself.
            deletes.retain(|d| !(d.kind == ObjectKind::Tree && d.path == *folder));
            continue;
        }

        if to.contains(folder) {
            // Folder survived; its per-file deletes are genuine.
            continue;
        }

        let ancestor = shallowest_missing_ancestor(to, folder);
        if !consolidated.insert(ancestor.to_lowercase()) {
            continue;
        }
        let prefix = format!("{}/", ancestor);
        deletes.retain(|d| d.path != ancestor && !d.path.starts_with(&prefix));
        deletes.push(DeleteOp {
            path: ancestor,
            kind: ObjectKind::Tree,
        });
    }
}

/// Emit a rename at each ancestor level whose case changed, deepest first,
/// stopping at the first level whose case is unchanged.
fn push_case_renames(
    old_dir: &str,
    new_dir: &str,
    renames: &mut Vec<RenameOp>,
    seen: &mut HashSet<String>,
) {
    let mut old = old_dir;
    let mut new = new_dir;
    while old != new {
        if seen.insert(old.to_lowercase()) {
            renames.push(RenameOp {
                old_path: old.to_string(),
                new_path: new.to_string(),
                content: None,
                parent_only: true,
            });
        }
        match (parent_folder(old), parent_folder(new)) {
            (Some(o), Some(n)) => {
                old = o;
                new = n;
            }
            _ => break,
        }
    }
}

/// Shallowest prefix of `folder` that does not exist in `to` at all.
fn shallowest_missing_ancestor(to: &Snapshot, folder: &str) -> String {
    for (i, ch) in folder.char_indices() {
        if ch == '/' {
            let prefix = &folder[..i];
            if !to.contains(prefix) {
                return prefix.to_string();
            }
        }
    }
    folder.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotEntry;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Build a snapshot from (path, content, executable?) triples; folder
    /// entries are synthesized for every ancestor.
    fn snap(files: &[(&str, &str, bool)]) -> Snapshot {
        let mut entries = BTreeMap::new();
        for (path, content, exec) in files {
            let mut dir = *path;
            while let Some(parent) = parent_folder(dir) {
                entries.insert(
                    parent.to_string(),
                    SnapshotEntry {
                        id: ObjectId::from_data(parent.as_bytes()),
                        kind: ObjectKind::Tree,
                        mode: FileMode::Regular,
                    },
                );
                dir = parent;
            }
            entries.insert(
                path.to_string(),
                SnapshotEntry {
                    id: ObjectId::from_data(content.as_bytes()),
                    kind: ObjectKind::Blob,
                    mode: if *exec {
                        FileMode::Executable
                    } else {
                        FileMode::Regular
                    },
                },
            );
        }
        Snapshot::from_entries(entries)
    }

    fn ci_eq(a: &str, b: &str) -> bool {
        a.to_lowercase() == b.to_lowercase()
    }

    fn ci_under(path: &str, folder: &str) -> bool {
        path.len() > folder.len()
            && path.as_bytes()[folder.len()] == b'/'
            && ci_eq(&path[..folder.len()], folder)
    }

    /// Replay the operation set over the from-side file view, in the fixed
    /// submission order, resolving paths the way a case-insensitive target
    /// would.
    fn apply(diff: &TreeDiff, from: &Snapshot) -> BTreeMap<String, (ObjectId, FileMode)> {
        let mut map: BTreeMap<String, (ObjectId, FileMode)> = from
            .files()
            .map(|(p, e)| (p.clone(), (e.id, e.mode)))
            .collect();
        for op in diff.operations() {
            match op {
                Operation::Delete(d) => {
                    map.retain(|p, _| !ci_eq(p, &d.path) && !ci_under(p, &d.path));
                }
                Operation::Edit(e) => {
                    map.retain(|p, _| !ci_eq(p, &e.path));
                    map.insert(e.path.clone(), (e.content, e.new_mode));
                }
                Operation::Add(a) => {
                    if a.kind == ObjectKind::Blob {
                        map.insert(a.path.clone(), (a.content, a.mode));
                    }
                }
                Operation::Rename(r) => {
                    let moved: Vec<(String, (ObjectId, FileMode))> = map
                        .iter()
                        .filter(|(p, _)| ci_eq(p, &r.old_path) || ci_under(p, &r.old_path))
                        .map(|(p, v)| (p.clone(), *v))
                        .collect();
                    for (p, mut v) in moved {
                        map.remove(&p);
                        let new_path = if ci_eq(&p, &r.old_path) {
                            if let Some(content) = r.content {
                                v.0 = content;
                            }
                            r.new_path.clone()
                        } else {
                            format!("{}{}", r.new_path, &p[r.old_path.len()..])
                        };
                        map.insert(new_path, v);
                    }
                }
            }
        }
        map
    }

    fn file_view(s: &Snapshot) -> BTreeMap<String, (ObjectId, FileMode)> {
        s.files().map(|(p, e)| (p.clone(), (e.id, e.mode))).collect()
    }

    #[test]
    fn test_identical_trees_diff_empty() {
        let a = snap(&[("a/b.txt", "one", false), ("c.txt", "two", true)]);
        let diff = diff_snapshots(Some(&a), &a).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_initial_diff_is_all_adds() {
        let to = snap(&[("a/b.txt", "one", false), ("c.txt", "two", false)]);
        let diff = diff_snapshots(None, &to).unwrap();
        assert_eq!(diff.adds.len(), 2);
        assert!(diff.deletes.is_empty() && diff.edits.is_empty() && diff.renames.is_empty());
    }

    #[test]
    fn test_content_edit() {
        let a = snap(&[("f.txt", "old", false)]);
        let b = snap(&[("f.txt", "new", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert_eq!(diff.edits.len(), 1);
        assert!(diff.edits[0].content_modified);
    }

    #[test]
    fn test_mode_only_edit() {
        let a = snap(&[("run.sh", "body", false)]);
        let b = snap(&[("run.sh", "body", true)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert_eq!(diff.edits.len(), 1);
        let edit = &diff.edits[0];
        assert!(!edit.content_modified);
        assert_eq!(edit.old_mode, FileMode::Regular);
        assert_eq!(edit.new_mode, FileMode::Executable);
    }

    #[test]
    fn test_case_only_folder_rename() {
        let a = snap(&[("Docs/readme.md", "h1", false)]);
        let b = snap(&[("docs/readme.md", "h1", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert!(diff.adds.is_empty());
        assert!(diff.deletes.is_empty());
        assert!(diff.edits.is_empty());
        assert_eq!(diff.renames.len(), 1);
        let r = &diff.renames[0];
        assert_eq!(r.old_path, "Docs");
        assert_eq!(r.new_path, "docs");
        assert!(r.parent_only);
    }

    #[test]
    fn test_case_only_file_rename() {
        let a = snap(&[("dir/README", "h", false)]);
        let b = snap(&[("dir/readme", "h", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert!(diff.adds.is_empty() && diff.deletes.is_empty());
        assert_eq!(diff.renames.len(), 1);
        let r = &diff.renames[0];
        assert_eq!(r.old_path, "dir/README");
        assert_eq!(r.new_path, "dir/readme");
        assert!(!r.parent_only);
        assert_eq!(r.content, Some(ObjectId::from_data(b"h")));
    }

    #[test]
    fn test_case_rename_with_content_change_keeps_edit() {
        let a = snap(&[("Docs/readme.md", "h1", false)]);
        let b = snap(&[("docs/readme.md", "h2", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert_eq!(diff.renames.len(), 1);
        assert_eq!(diff.edits.len(), 1);
        assert_eq!(diff.edits[0].path, "docs/readme.md");
        assert!(diff.edits[0].content_modified);
        assert_eq!(apply(&diff, &a), file_view(&b));
    }

    #[test]
    fn test_type_swap_blob_to_tree() {
        let a = snap(&[("x", "file", false)]);
        let b = snap(&[("x/y", "child", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert_eq!(diff.deletes.len(), 1);
        assert_eq!(diff.deletes[0].path, "x");
        assert_eq!(diff.deletes[0].kind, ObjectKind::Blob);
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(diff.adds[0].path, "x/y");
        assert!(diff.renames.is_empty());
        assert_eq!(apply(&diff, &a), file_view(&b));
    }

    #[test]
    fn test_type_swap_tree_to_blob() {
        let a = snap(&[("x/y", "child", false), ("x/z", "other", false)]);
        let b = snap(&[("x", "file", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        // One delete for the whole subtree, not one per leaf.
        assert_eq!(diff.deletes.len(), 1);
        assert_eq!(diff.deletes[0].path, "x");
        assert_eq!(diff.deletes[0].kind, ObjectKind::Tree);
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(diff.adds[0].path, "x");
        assert_eq!(apply(&diff, &a), file_view(&b));
    }

    #[test]
    fn test_unrelated_rename_is_delete_plus_add() {
        let a = snap(&[("old/f", "h", false)]);
        let b = snap(&[("new/f", "h", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert!(diff.renames.is_empty());
        assert_eq!(diff.deletes.len(), 1);
        assert_eq!(diff.deletes[0].path, "old");
        assert_eq!(diff.deletes[0].kind, ObjectKind::Tree);
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(diff.adds[0].path, "new/f");
        assert_eq!(apply(&diff, &a), file_view(&b));
    }

    #[test]
    fn test_folder_rename_with_sibling_delete() {
        let a = snap(&[("A/f", "h", false), ("A/g", "gone", false)]);
        let b = snap(&[("a/f", "h", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert_eq!(diff.renames.len(), 1);
        assert_eq!(diff.renames[0].old_path, "A");
        assert_eq!(diff.renames[0].new_path, "a");
        assert_eq!(diff.deletes.len(), 1);
        assert_eq!(diff.deletes[0].path, "A/g");
        assert_eq!(apply(&diff, &a), file_view(&b));
    }

    #[test]
    fn test_nested_case_rename_emits_each_level() {
        let a = snap(&[("Top/Sub/f", "h", false)]);
        let b = snap(&[("top/sub/f", "h", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        let pairs: Vec<(&str, &str)> = diff
            .renames
            .iter()
            .map(|r| (r.old_path.as_str(), r.new_path.as_str()))
            .collect();
        assert_eq!(pairs, vec![("Top/Sub", "top/sub"), ("Top", "top")]);
        assert_eq!(apply(&diff, &a), file_view(&b));
    }

    #[test]
    fn test_case_collision_rejected() {
        let to = snap(&[("A/x", "one", false), ("a/x", "two", false)]);
        let err = diff_snapshots(None, &to).unwrap_err();
        assert!(matches!(err, SyncError::CaseCollision { .. }));
    }

    #[test]
    fn test_deletes_within_surviving_folder_stay_per_file() {
        let a = snap(&[("d/a", "1", false), ("d/b", "2", false)]);
        let b = snap(&[("d/a", "1", false), ("d/new", "3", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert_eq!(diff.deletes.len(), 1);
        assert_eq!(diff.deletes[0].path, "d/b");
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(apply(&diff, &a), file_view(&b));
    }

    #[test]
    fn test_vanished_nested_folder_consolidates_to_shallowest() {
        let a = snap(&[("gone/deep/f1", "1", false), ("gone/deep/f2", "2", false)]);
        let b = snap(&[("kept", "3", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        assert_eq!(diff.deletes.len(), 1);
        assert_eq!(diff.deletes[0].path, "gone");
        assert_eq!(diff.deletes[0].kind, ObjectKind::Tree);
        assert_eq!(apply(&diff, &a), file_view(&b));
    }

    #[test]
    fn test_submission_order_contract() {
        let a = snap(&[("del.txt", "x", false), ("edit.txt", "old", false)]);
        let b = snap(&[("edit.txt", "new", false), ("add.txt", "y", false)]);
        let diff = diff_snapshots(Some(&a), &b).unwrap();
        let ops = diff.operations();
        let kinds: Vec<u8> = ops
            .iter()
            .map(|op| match op {
                Operation::Delete(_) => 0,
                Operation::Edit(_) => 1,
                Operation::Add(_) => 2,
                Operation::Rename(_) => 3,
            })
            .collect();
        let mut sorted = kinds.clone();
        sorted.sort_unstable();
        assert_eq!(kinds, sorted);
    }

    fn arb_file_map() -> impl Strategy<Value = Vec<(String, u8, bool)>> {
        let segment = prop_oneof![
            Just("a".to_string()),
            Just("b".to_string()),
            Just("c".to_string()),
            Just("d".to_string()),
        ];
        let path = proptest::collection::vec(segment, 1..=3).prop_map(|v| v.join("/"));
        proptest::collection::btree_map(path, (any::<u8>(), any::<bool>()), 0..10).prop_map(|m| {
            // Drop any path that is also used as a folder by another path.
            let keys: Vec<String> = m.keys().cloned().collect();
            m.into_iter()
                .filter(|(k, _)| {
                    let prefix = format!("{}/", k);
                    !keys.iter().any(|other| other.starts_with(&prefix))
                })
                .map(|(k, (content, exec))| (k, content, exec))
                .collect()
        })
    }

    proptest! {
        /// Replaying diff(A, B) over A in submission order reproduces B.
        #[test]
        fn prop_apply_reproduces_target(a in arb_file_map(), b in arb_file_map()) {
            let a_files: Vec<(&str, String, bool)> = a
                .iter()
                .map(|(p, c, e)| (p.as_str(), format!("{}", c), *e))
                .collect();
            let b_files: Vec<(&str, String, bool)> = b
                .iter()
                .map(|(p, c, e)| (p.as_str(), format!("{}", c), *e))
                .collect();
            let a_refs: Vec<(&str, &str, bool)> =
                a_files.iter().map(|(p, c, e)| (*p, c.as_str(), *e)).collect();
            let b_refs: Vec<(&str, &str, bool)> =
                b_files.iter().map(|(p, c, e)| (*p, c.as_str(), *e)).collect();
            let from = snap(&a_refs);
            let to = snap(&b_refs);
            let diff = diff_snapshots(Some(&from), &to).unwrap();
            prop_assert_eq!(apply(&diff, &from), file_view(&to));
        }

        /// A tree diffed against itself is always empty.
        #[test]
        fn prop_self_diff_empty(a in arb_file_map()) {
            let a_files: Vec<(&str, String, bool)> = a
                .iter()
                .map(|(p, c, e)| (p.as_str(), format!("{}", c), *e))
                .collect();
            let a_refs: Vec<(&str, &str, bool)> =
                a_files.iter().map(|(p, c, e)| (*p, c.as_str(), *e)).collect();
            let from = snap(&a_refs);
            let diff = diff_snapshots(Some(&from), &from).unwrap();
            prop_assert!(diff.is_empty());
        }
    }
}
