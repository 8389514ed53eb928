//! Synchronization orchestrator
//!
//! Drives delta resolution, tree diffing and tree building against the two
//! external systems. This is the only layer that performs I/O against the
//! collaborators, the only layer that decides fatal-versus-warning, and the
//! only writer of the RevisionMap.
//!
//! Runs are sequential: every delta depends on the mapping its predecessor
//! recorded. A run may be aborted between deltas; mappings recorded so far
//! stay valid and the next run resumes from them.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::delta::{ResolveMode, ResolveOptions, resolve_deltas};
use crate::diff::{TreeDiff, diff_snapshots};
use crate::error::{Result, SyncError};
use crate::object::{Commit, ObjectId, ObjectKind, Signature};
use crate::revmap::RevisionMap;
use crate::snapshot::Snapshot;
use crate::store::SourceStore;
use crate::target::{RevisionMeta, TargetService, WorkspaceHandle};
use crate::treebuild::{TreeFile, build_tree};

/// Progress of a checkin run, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Init,
    WorkspaceReady,
    Locked,
    Unlocked,
    ApplyingDelta(usize),
    Committed(usize),
    Cleanup,
    Done,
}

/// Non-fatal findings of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncWarning {
    /// A produced revision number did not match the advisory expectation;
    /// another writer is interleaving with the unlocked run.
    ConcurrentWriterDetected { expected: u64, actual: u64 },
    /// Lock release or workspace disposal failed after the work was done.
    CleanupFailed { detail: String },
}

/// Result of a completed checkin run.
#[derive(Debug, Clone, Default)]
pub struct CheckinReport {
    /// Revisions produced by this run
    pub revisions: u64,
    /// Final (revision, commit) pair, if any revision was produced
    pub head: Option<(u64, ObjectId)>,
    pub warnings: Vec<SyncWarning>,
}

/// Outcome of a checkin request.
#[derive(Debug, Clone)]
pub enum CheckinOutcome {
    /// The target already reflects the source head; nothing was written.
    AlreadyUpToDate,
    Committed(CheckinReport),
}

/// Result of a fetch run.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Commits created by this run
    pub commits: u64,
    /// Final (revision, commit) pair, if any commit was created
    pub head: Option<(u64, ObjectId)>,
}

/// Drives synchronization between one source repository and one target path.
pub struct Orchestrator<'a, S, T> {
    source: &'a S,
    target: &'a T,
    map: &'a mut RevisionMap,
    root: String,
}

impl<'a, S: SourceStore, T: TargetService> Orchestrator<'a, S, T> {
    pub fn new(
        source: &'a S,
        target: &'a T,
        map: &'a mut RevisionMap,
        root: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            map,
            root: root.into(),
        }
    }

    /// Forward protocol: replay source commits onto the target as numbered
    /// revisions, one revision per non-empty delta.
    pub async fn checkin(
        &mut self,
        head: ObjectId,
        opts: &ResolveOptions,
    ) -> Result<CheckinOutcome> {
        debug!(phase = ?SyncPhase::Init, root = %self.root, head = %head, "starting checkin");
        let ws = self
            .target
            .create_workspace(&self.root)
            .await
            .map_err(|e| SyncError::WorkspaceCreationFailed {
                path: self.root.clone(),
                reason: e.to_string(),
            })?;
        debug!(phase = ?SyncPhase::WorkspaceReady, workspace = %ws.id, "workspace acquired");

        let mut warnings = Vec::new();
        let mut locked = false;
        let result = self
            .checkin_inner(&ws, head, opts, &mut locked, &mut warnings)
            .await;

        // Cleanup always runs; its failures never mask the primary result.
        debug!(phase = ?SyncPhase::Cleanup, "releasing lock and workspace");
        if locked {
            if let Err(e) = self.target.unlock(&ws, &self.root).await {
                warn!(error = %e, "failed to release target lock");
                warnings.push(SyncWarning::CleanupFailed {
                    detail: format!("unlock: {}", e),
                });
            }
        }
        if let Err(e) = self.target.dispose_workspace(ws).await {
            warn!(error = %e, "failed to dispose workspace");
            warnings.push(SyncWarning::CleanupFailed {
                detail: format!("dispose: {}", e),
            });
        }

        match result {
            Ok(CheckinOutcome::Committed(mut report)) => {
                report.warnings.extend(warnings);
                debug!(phase = ?SyncPhase::Done, revisions = report.revisions, "checkin complete");
                Ok(CheckinOutcome::Committed(report))
            }
            other => other,
        }
    }

    async fn checkin_inner(
        &mut self,
        ws: &WorkspaceHandle,
        head: ObjectId,
        opts: &ResolveOptions,
        locked: &mut bool,
        warnings: &mut Vec<SyncWarning>,
    ) -> Result<CheckinOutcome> {
        if opts.mode == ResolveMode::LinearPreserving {
            self.target.lock(ws, &self.root).await?;
            *locked = true;
            debug!(phase = ?SyncPhase::Locked, "target path locked");
        } else {
            debug!(phase = ?SyncPhase::Unlocked, "single-squash mode runs unlocked");
        }

        // Unlocked runs can only detect a concurrent writer after the fact,
        // via this advisory expectation.
        let mut expected_next = if *locked {
            None
        } else {
            Some(self.target.latest_revision("").await?.unwrap_or(0) + 1)
        };

        let last_mapped = self.map.last_mapped()?;
        let current_head = self.target.latest_revision(&self.root).await?;

        match (current_head, &last_mapped) {
            (Some(revision), None) => {
                // An unmapped target is acceptable only while it is empty.
                let items = self.target.snapshot(&self.root, revision).await?;
                if !items.is_empty() {
                    return Err(SyncError::NotEmptyTarget(self.root.clone()));
                }
            }
            (Some(revision), Some(_)) => match self.map.commit_for(revision)? {
                None => return Err(SyncError::FastForwardRequired { revision }),
                Some(commit) if commit == head => return Ok(CheckinOutcome::AlreadyUpToDate),
                Some(_) => {}
            },
            (None, Some(_)) => return Err(SyncError::TargetDeleted(self.root.clone())),
            (None, None) => {}
        }

        let since = last_mapped.map(|(_, commit)| commit);
        let deltas = resolve_deltas(self.source, since, head, opts).await?;
        debug!(count = deltas.len(), "resolved delta sequence");

        let mut report = CheckinReport::default();
        for (index, delta) in deltas.iter().enumerate() {
            debug!(phase = ?SyncPhase::ApplyingDelta(index), to = %delta.to, "applying delta");
            if let Err(e) = self.target.clean(ws).await {
                warn!(error = %e, "workspace clean failed; continuing");
            }

            let to_snapshot = Snapshot::of_commit(self.source, delta.to).await?;
            let from_snapshot = match delta.from {
                Some(commit) => Some(Snapshot::of_commit(self.source, commit).await?),
                None => None,
            };
            let diff = diff_snapshots(from_snapshot.as_ref(), &to_snapshot)?;
            if diff.is_empty() {
                debug!(to = %delta.to, "empty delta; no revision produced");
                continue;
            }

            self.materialize_changes(ws, &diff, &to_snapshot).await?;
            self.target.pend(ws, &diff.operations()).await?;
            // Defensive isolation: commit only what is pending under our
            // root, whatever else the workspace may have accumulated.
            let pending = self.target.query_pending(ws, "").await?;
            let source_commit = self.source.commit(delta.to).await?;
            let meta = RevisionMeta {
                owner: source_commit.author.name.clone(),
                timestamp: source_commit.author.when,
            };
            let revision = self
                .target
                .commit(ws, &pending, &source_commit.message, &meta)
                .await?;
            // Persist the mapping before anything else can fail, so a
            // later abort resumes from here.
            self.map.record(revision, delta.to)?;
            debug!(phase = ?SyncPhase::Committed(index), revision, commit = %delta.to, "delta committed");

            if let Some(expected) = expected_next {
                if revision != expected {
                    warn!(expected, actual = revision, "revision number drifted; concurrent writer suspected");
                    warnings.push(SyncWarning::ConcurrentWriterDetected {
                        expected,
                        actual: revision,
                    });
                }
                expected_next = Some(revision + 1);
            }

            report.revisions += 1;
            report.head = Some((revision, delta.to));
        }

        report.warnings = std::mem::take(warnings);
        Ok(CheckinOutcome::Committed(report))
    }

    /// Write every blob the operation set references into the workspace.
    async fn materialize_changes(
        &self,
        ws: &WorkspaceHandle,
        diff: &TreeDiff,
        to: &Snapshot,
    ) -> Result<()> {
        for add in &diff.adds {
            if add.kind == ObjectKind::Blob {
                let data = self.source.blob(add.content).await?;
                self.target.materialize(ws, &add.path, data, add.mode).await?;
            }
        }
        for edit in &diff.edits {
            let data = self.source.blob(edit.content).await?;
            self.target
                .materialize(ws, &edit.path, data, edit.new_mode)
                .await?;
        }
        for rename in &diff.renames {
            if let Some(content) = rename.content {
                let data = self.source.blob(content).await?;
                let mode = to.get(&rename.new_path).map(|e| e.mode).unwrap_or_default();
                self.target
                    .materialize(ws, &rename.new_path, data, mode)
                    .await?;
            }
        }
        Ok(())
    }

    /// Reverse protocol: replay target revisions newer than the last
    /// mapping as source commits, one commit per revision that changed
    /// anything under the root.
    pub async fn fetch(&mut self) -> Result<FetchReport> {
        let Some(latest) = self.target.latest_revision(&self.root).await? else {
            return Ok(FetchReport::default());
        };
        let last_mapped = self.map.last_mapped()?;
        let (start, mut parent) = match last_mapped {
            Some((revision, commit)) => (revision + 1, Some(commit)),
            None => (1, None),
        };

        // Content-reuse cache: path → (item stamp, blob id). Seeded from
        // the last synchronized state so an unchanged file is never
        // re-fetched, then rolled forward revision by revision.
        let mut reuse: HashMap<String, (u64, ObjectId)> = HashMap::new();
        if let Some((revision, commit)) = last_mapped {
            let parent_snapshot = Snapshot::of_commit(self.source, commit).await?;
            for item in self.target.snapshot(&self.root, revision).await? {
                if let Some(entry) = parent_snapshot.get(&item.path) {
                    if entry.kind == ObjectKind::Blob {
                        reuse.insert(item.path, (item.item_revision, entry.id));
                    }
                }
            }
        }

        let mut report = FetchReport::default();
        for revision in start..=latest {
            let items = self.target.snapshot(&self.root, revision).await?;
            let mut files = Vec::with_capacity(items.len());
            let mut next_reuse = HashMap::with_capacity(items.len());
            for item in items {
                let content = match reuse.get(&item.path) {
                    Some((stamp, id)) if *stamp == item.item_revision => *id,
                    _ => {
                        let full = self.full_path(&item.path);
                        let data = self.target.read_item(&full, revision).await?;
                        self.source.insert_blob(data).await?
                    }
                };
                next_reuse.insert(item.path.clone(), (item.item_revision, content));
                files.push(TreeFile::new(item.path, content, item.mode));
            }
            reuse = next_reuse;

            if parent.is_none() && files.is_empty() {
                // Nothing under the root yet; don't manufacture commits.
                continue;
            }
            let tree = build_tree(self.source, &files).await?;
            if let Some(parent_id) = parent {
                if self.source.commit(parent_id).await?.tree == tree {
                    debug!(revision, "no changes under root; skipping");
                    continue;
                }
            }

            let info = self.target.revision_info(revision).await?;
            let signature = Signature::new(info.owner, info.timestamp);
            let commit = Commit::new(
                tree,
                parent.into_iter().collect(),
                signature.clone(),
                signature,
                info.comment,
            );
            let id = self.source.insert_commit(commit).await?;
            self.map.record(revision, id)?;
            parent = Some(id);
            report.commits += 1;
            report.head = Some((revision, id));
            debug!(revision, commit = %id, "fetched revision");
        }
        Ok(report)
    }

    fn full_path(&self, rel: &str) -> String {
        if self.root.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{}", self.root, rel)
        }
    }
}
