//! Error types for the reconciliation engine.
//!
//! Everything here is fatal to the run it occurs in: the orchestrator is the
//! only layer that downgrades failures, and it does so by reporting
//! [`SyncWarning`](crate::orchestrator::SyncWarning) values instead of
//! errors.

use crate::object::ObjectId;

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while resolving deltas, diffing trees, or driving
/// a synchronization run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The target path already has content but no revision is mapped.
    #[error("target path '{0}' is not empty and has no recorded mapping")]
    NotEmptyTarget(String),

    /// The newest target revision was produced outside of the bridge.
    #[error("target revision {revision} has no mapped commit; fetch and fast-forward first")]
    FastForwardRequired { revision: u64 },

    /// Mappings exist but the target path is gone.
    #[error("target path '{0}' no longer exists but mappings are recorded for it")]
    TargetDeleted(String),

    /// A merge commit with more than one candidate parent was reached.
    #[error("commit {at} has multiple unsquashed parents; supply a squash set or enable auto-squash")]
    NonLinearHistory { at: ObjectId },

    /// A root commit was reached while a base commit was still expected.
    #[error("reached root commit {at} before the requested base commit")]
    NonLinearOrigin { at: ObjectId },

    /// Every parent of a merge commit is in the squash set.
    #[error("every parent of commit {at} is squashed")]
    AllParentsSquashed { at: ObjectId },

    /// The squash set names a commit that is the only way backward.
    #[error("commit {parent} is squashed but is the sole parent of {at}")]
    CommitSquashedButIsSoleParent { parent: ObjectId, at: ObjectId },

    /// Two distinct paths collide under the target's case-insensitive rules.
    #[error("paths '{first}' and '{second}' collide under case-insensitive comparison")]
    CaseCollision { first: String, second: String },

    /// The target service refused the pending operation set.
    #[error("target rejected pending operations: {0}")]
    PendRejected(String),

    /// Workspace acquisition failed before any mutation happened.
    #[error("failed to create workspace for '{path}': {reason}")]
    WorkspaceCreationFailed { path: String, reason: String },

    /// No path through the DAG connects the head to the requested base.
    #[error("commit {base} is not reachable from {head}")]
    BaseUnreachable { base: ObjectId, head: ObjectId },

    /// Object or revision lookup failed.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// Revision lookup failed on the target side.
    #[error("revision {0} not found")]
    RevisionNotFound(u64),

    /// RevisionMap persistence failure.
    #[error("database error: {0}")]
    Database(String),

    /// Object encoding/decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Collaborator-reported failure (lock contention, disposed handles, ...).
    #[error("target service error: {0}")]
    Target(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<bincode::Error> for SyncError {
    fn from(e: bincode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}
