//! Core object model for the source side of the bridge
//!
//! Implements a content-addressable object graph of Blob, Tree, and Commit
//! objects. Commits form a DAG via parent links; trees are structurally
//! shared between commits.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Unique identifier for any stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute ObjectId from data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// File mode of a tree entry.
///
/// The target system only distinguishes regular from executable files, so
/// the source-side mode collapses to the same two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileMode {
    Regular,
    Executable,
}

impl FileMode {
    /// Unix permission bits for this mode
    pub fn as_unix(&self) -> u32 {
        match self {
            FileMode::Regular => 0o644,
            FileMode::Executable => 0o755,
        }
    }

    /// Classify Unix permission bits (any execute bit means executable)
    pub fn from_unix(mode: u32) -> Self {
        if mode & 0o111 != 0 {
            FileMode::Executable
        } else {
            FileMode::Regular
        }
    }
}

impl Default for FileMode {
    fn default() -> Self {
        FileMode::Regular
    }
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

/// File content object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    /// Raw content data
    pub data: Vec<u8>,
}

impl Blob {
    /// Create a new blob from data
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Compute the object ID (content only; mode lives on the tree entry)
    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&self.data)
    }

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary format
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

/// Directory tree entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Name of the entry (single path segment)
    pub name: String,
    /// Object ID (points to a Blob or a Tree)
    pub id: ObjectId,
    /// Entry type
    pub kind: ObjectKind,
    /// File mode; trees always carry `Regular`
    pub mode: FileMode,
}

impl TreeEntry {
    /// Create a new tree entry
    pub fn new(name: String, id: ObjectId, kind: ObjectKind, mode: FileMode) -> Self {
        Self {
            name,
            id,
            kind,
            mode,
        }
    }

    /// Entry for a blob child
    pub fn blob(name: impl Into<String>, id: ObjectId, mode: FileMode) -> Self {
        Self::new(name.into(), id, ObjectKind::Blob, mode)
    }

    /// Entry for a tree child
    pub fn tree(name: impl Into<String>, id: ObjectId) -> Self {
        Self::new(name.into(), id, ObjectKind::Tree, FileMode::Regular)
    }
}

/// Directory object
///
/// Entries are kept sorted by name so serialization, and therefore the
/// content address, is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: BTreeMap<String, TreeEntry>,
}

impl Tree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add or update an entry
    pub fn insert(&mut self, entry: TreeEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Remove an entry
    pub fn remove(&mut self, name: &str) -> Option<TreeEntry> {
        self.entries.remove(name)
    }

    /// Get an entry
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&bincode::serialize(self).unwrap_or_default())
    }

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary format
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Iterate over entries in name order
    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }
}

/// Identity attached to a commit (author or committer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Display name
    pub name: String,
    /// Timestamp (Unix seconds)
    pub when: i64,
    /// Timezone offset in minutes
    pub tz_offset: i32,
}

impl Signature {
    pub fn new(name: impl Into<String>, when: i64) -> Self {
        Self {
            name: name.into(),
            when,
            tz_offset: 0,
        }
    }
}

/// Commit object
///
/// Immutable once inserted; the identifier is the content hash over all
/// fields, so two commits with the same tree but different messages or
/// parents are distinct objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Root tree for this commit
    pub tree: ObjectId,
    /// Parent commit IDs (empty for a root commit)
    pub parents: Vec<ObjectId>,
    /// Author identity
    pub author: Signature,
    /// Committer identity
    pub committer: Signature,
    /// Commit message
    pub message: String,
}

impl Commit {
    pub fn new(
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: Signature,
        committer: Signature,
        message: String,
    ) -> Self {
        Self {
            tree,
            parents,
            author,
            committer,
            message,
        }
    }

    /// Compute the object ID
    pub fn id(&self) -> ObjectId {
        ObjectId::from_data(&bincode::serialize(self).unwrap_or_default())
    }

    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary format
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Check if this is a root commit (no parents)
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        let bytes = [42u8; 32];
        let id = ObjectId::new(bytes);
        let hex = id.to_hex();
        let id2 = ObjectId::from_hex(&hex).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_blob_id() {
        let blob = Blob::new(b"hello world".to_vec());
        assert_eq!(blob.id().to_hex().len(), 64);
    }

    #[test]
    fn test_file_mode_unix() {
        assert_eq!(FileMode::from_unix(0o644), FileMode::Regular);
        assert_eq!(FileMode::from_unix(0o755), FileMode::Executable);
        assert_eq!(FileMode::Executable.as_unix(), 0o755);
    }

    #[test]
    fn test_tree_insert_remove() {
        let mut tree = Tree::new();
        tree.insert(TreeEntry::blob(
            "test.txt",
            ObjectId::new([0u8; 32]),
            FileMode::Regular,
        ));
        assert!(tree.get("test.txt").is_some());
        tree.remove("test.txt");
        assert!(tree.get("test.txt").is_none());
    }

    #[test]
    fn test_tree_id_deterministic() {
        let mut a = Tree::new();
        a.insert(TreeEntry::blob("b", ObjectId::new([2u8; 32]), FileMode::Regular));
        a.insert(TreeEntry::blob("a", ObjectId::new([1u8; 32]), FileMode::Regular));

        let mut b = Tree::new();
        b.insert(TreeEntry::blob("a", ObjectId::new([1u8; 32]), FileMode::Regular));
        b.insert(TreeEntry::blob("b", ObjectId::new([2u8; 32]), FileMode::Regular));

        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_commit_serialization() {
        let commit = Commit::new(
            ObjectId::new([1u8; 32]),
            vec![ObjectId::new([2u8; 32])],
            Signature::new("Test Author", 1234567890),
            Signature::new("Test Author", 1234567890),
            "Test message".to_string(),
        );
        let bytes = commit.to_bytes().unwrap();
        let commit2 = Commit::from_bytes(&bytes).unwrap();
        assert_eq!(commit.id(), commit2.id());
    }

    #[test]
    fn test_commit_id_depends_on_parents() {
        let tree = ObjectId::new([1u8; 32]);
        let sig = Signature::new("a", 0);
        let root = Commit::new(tree, vec![], sig.clone(), sig.clone(), "m".into());
        let child = Commit::new(tree, vec![root.id()], sig.clone(), sig, "m".into());
        assert_ne!(root.id(), child.id());
    }
}
