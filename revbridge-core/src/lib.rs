//! RevBridge Core Library
//!
//! Reconciliation engine between a content-addressed, DAG-versioned source
//! repository and a centralized, path-versioned target system:
//! - Object model (Blob, Tree, Commit)
//! - Collaborator abstractions for both sides, with in-memory references
//! - Delta resolution over the commit DAG
//! - Tree diffing with case-rename and type-swap handling
//! - Tree building from flat path listings
//! - Persistent revision ↔ commit map (SQLite)
//! - Checkin/fetch orchestration with resume semantics

pub mod delta;
pub mod diff;
pub mod error;
pub mod object;
pub mod orchestrator;
pub mod revmap;
pub mod snapshot;
pub mod store;
pub mod target;
pub mod treebuild;

pub use delta::{CommitDelta, ResolveMode, ResolveOptions, resolve_deltas};
pub use diff::{AddOp, DeleteOp, EditOp, Operation, RenameOp, TreeDiff, diff_snapshots};
pub use error::{Result, SyncError};
pub use object::{Blob, Commit, FileMode, ObjectId, ObjectKind, Signature, Tree, TreeEntry};
pub use orchestrator::{
    CheckinOutcome, CheckinReport, FetchReport, Orchestrator, SyncPhase, SyncWarning,
};
pub use revmap::{MapEntry, RevisionMap};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use store::{MemorySourceStore, SourceStore};
pub use target::{
    MemoryTargetService, RevisionInfo, RevisionMeta, TargetItem, TargetService, WorkspaceHandle,
};
pub use treebuild::{TreeFile, build_tree};
