//! Delta resolver
//!
//! Given the commit DAG and two endpoints, decides which snapshot pairs
//! have to be reconciled, oldest first. The target system only understands
//! linear history, so anything non-linear either stops the walk (merge
//! boundary at the base), gets folded away via a squash set, or is an
//! error the caller must resolve.

use std::collections::HashSet;

use crate::error::{Result, SyncError};
use crate::object::ObjectId;
use crate::store::SourceStore;

/// A (from, to) pair of source commits to reconcile in one step.
///
/// `from` is `None` exactly once per history: for the delta that introduces
/// the root commit. When present, `from` is an ancestor of `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitDelta {
    pub from: Option<ObjectId>,
    pub to: ObjectId,
}

/// How the resolver treats history between the endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// Walk every commit between base and head; refuse ambiguity.
    #[default]
    LinearPreserving,
    /// Collapse everything into a single delta spanning the endpoints.
    SingleSquash,
}

/// Options for a resolution run.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub mode: ResolveMode,
    /// Commits treated as already folded into an ancestor.
    pub squashed: HashSet<ObjectId>,
    /// In linear-preserving mode, collapse the remaining range instead of
    /// failing with `NonLinearHistory` at an ambiguous merge.
    pub auto_squash: bool,
    /// Upper bound on the number of deltas; the oldest ones are merged
    /// into a single synthetic delta to stay under it.
    pub max_depth: Option<usize>,
}

/// Resolve the ordered delta sequence from `since` (exclusive, `None` for
/// the beginning of history) up to `head` (inclusive).
pub async fn resolve_deltas<S: SourceStore + ?Sized>(
    store: &S,
    since: Option<ObjectId>,
    head: ObjectId,
    opts: &ResolveOptions,
) -> Result<Vec<CommitDelta>> {
    if since == Some(head) {
        return Ok(Vec::new());
    }

    let deltas = match opts.mode {
        ResolveMode::LinearPreserving => walk_linear(store, since, head, opts).await?,
        ResolveMode::SingleSquash => {
            if !path_exists(store, since, head).await? {
                return Err(unreachable_base(since, head));
            }
            vec![CommitDelta { from: since, to: head }]
        }
    };

    Ok(match opts.max_depth {
        Some(depth) => prune_depth(deltas, depth),
        None => deltas,
    })
}

async fn walk_linear<S: SourceStore + ?Sized>(
    store: &S,
    since: Option<ObjectId>,
    head: ObjectId,
    opts: &ResolveOptions,
) -> Result<Vec<CommitDelta>> {
    let mut newest_first: Vec<CommitDelta> = Vec::new();
    let mut current = head;

    loop {
        let parents = store.parents(current).await?;
        match parents.len() {
            0 => {
                if since.is_some() {
                    return Err(SyncError::NonLinearOrigin { at: current });
                }
                newest_first.push(CommitDelta {
                    from: None,
                    to: current,
                });
                break;
            }
            1 => {
                let parent = parents[0];
                if Some(parent) == since {
                    newest_first.push(CommitDelta {
                        from: Some(parent),
                        to: current,
                    });
                    break;
                }
                if opts.squashed.contains(&parent) {
                    return Err(SyncError::CommitSquashedButIsSoleParent {
                        parent,
                        at: current,
                    });
                }
                newest_first.push(CommitDelta {
                    from: Some(parent),
                    to: current,
                });
                current = parent;
            }
            _ => {
                // Merge boundary: stop when exactly one parent is the base.
                if let Some(base) = since {
                    if parents.iter().filter(|p| **p == base).count() == 1 {
                        newest_first.push(CommitDelta {
                            from: Some(base),
                            to: current,
                        });
                        break;
                    }
                }
                let candidates: Vec<ObjectId> = parents
                    .iter()
                    .copied()
                    .filter(|p| !opts.squashed.contains(p))
                    .collect();
                match candidates.len() {
                    0 => return Err(SyncError::AllParentsSquashed { at: current }),
                    1 => {
                        let parent = candidates[0];
                        newest_first.push(CommitDelta {
                            from: Some(parent),
                            to: current,
                        });
                        if Some(parent) == since {
                            break;
                        }
                        current = parent;
                    }
                    _ if opts.auto_squash => {
                        // Fold the remaining range into one delta instead of
                        // refusing the merge.
                        if !path_exists(store, since, current).await? {
                            return Err(unreachable_base(since, current));
                        }
                        tracing::debug!(at = %current, "auto-squashing ambiguous merge");
                        newest_first.push(CommitDelta {
                            from: since,
                            to: current,
                        });
                        break;
                    }
                    _ => return Err(SyncError::NonLinearHistory { at: current }),
                }
            }
        }
    }

    newest_first.reverse();
    Ok(newest_first)
}

/// Whether some chain of parent links connects `head` down to `base`
/// (or to any root when `base` is `None`).
///
/// Depth-first over an explicit worklist; parents are explored in reverse
/// declared order and the first discovered path wins.
async fn path_exists<S: SourceStore + ?Sized>(
    store: &S,
    base: Option<ObjectId>,
    head: ObjectId,
) -> Result<bool> {
    let mut stack = vec![head];
    let mut visited: HashSet<ObjectId> = HashSet::new();
    while let Some(id) = stack.pop() {
        if Some(id) == base {
            return Ok(true);
        }
        if !visited.insert(id) {
            continue;
        }
        let parents = store.parents(id).await?;
        if parents.is_empty() && base.is_none() {
            return Ok(true);
        }
        // Pushing in declared order makes the pop explore the last-declared
        // parent first.
        stack.extend(parents);
    }
    Ok(false)
}

/// Collapse the oldest deltas into one synthetic delta so at most
/// `max_depth` remain; the newest `max_depth - 1` keep full granularity.
fn prune_depth(mut deltas: Vec<CommitDelta>, max_depth: usize) -> Vec<CommitDelta> {
    if max_depth == 0 || deltas.len() <= max_depth {
        return deltas;
    }
    let cut = deltas.len() - max_depth + 1;
    let boundary = CommitDelta {
        from: deltas[0].from,
        to: deltas[cut - 1].to,
    };
    let mut pruned = Vec::with_capacity(max_depth);
    pruned.push(boundary);
    pruned.extend(deltas.drain(cut..));
    pruned
}

fn unreachable_base(base: Option<ObjectId>, head: ObjectId) -> SyncError {
    match base {
        Some(base) => SyncError::BaseUnreachable { base, head },
        None => SyncError::NonLinearOrigin { at: head },
    }
}
