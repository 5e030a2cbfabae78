//! Operational transformation against a window of committed operations

use crate::config::ConflictPolicy;
use crate::models::{CommittedOperation, Operation, OperationKind, PathSegment};

/// What became of an incoming operation
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// Still meaningful; apply this (possibly rewritten) operation
    Transformed(Operation),
    /// Cannot be applied without losing newer work
    Rejected(Vec<CommittedOperation>),
}

/// Rewrites stale operations so they can be applied on top of newer commits
#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer {
    policy: ConflictPolicy,
}

impl Transformer {
    pub const fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Transform `incoming` past every operation in `pending`.
    ///
    /// `pending` must hold the operations committed after the incoming
    /// operation's base version, in commit order.
    pub fn transform(
        &self,
        incoming: &Operation,
        pending: &[CommittedOperation],
    ) -> TransformOutcome {
        let mut current = incoming.clone();

        for committed in pending {
            let applied = &committed.operation;

            if applied.id == current.id {
                tracing::debug!(
                    "Operation {} was already committed at version {}",
                    current.id,
                    committed.version
                );
                return TransformOutcome::Rejected(vec![committed.clone()]);
            }

            if paths_conflict(&current.kind, &applied.kind) && self.loses_to(&current, applied) {
                tracing::debug!(
                    "Operation {} conflicts with {} committed at version {}",
                    current.id,
                    applied.id,
                    committed.version
                );
                return TransformOutcome::Rejected(vec![committed.clone()]);
            }

            if let Some(shifted) = shift_insert(&current.kind, &applied.kind) {
                tracing::debug!(
                    "Shifted insert {} past insert committed at version {}",
                    current.id,
                    committed.version
                );
                current.kind = shifted;
            }

            if is_double_delete(&current.kind, &applied.kind) {
                tracing::debug!(
                    "Operation {} deletes a path already deleted at version {}",
                    current.id,
                    committed.version
                );
                return TransformOutcome::Rejected(vec![committed.clone()]);
            }
        }

        TransformOutcome::Transformed(current)
    }

    fn loses_to(&self, incoming: &Operation, committed: &Operation) -> bool {
        match self.policy {
            ConflictPolicy::ClientTimestamp => incoming.timestamp < committed.timestamp,
            ConflictPolicy::CommitOrder => true,
        }
    }
}

/// Any path of one operation equals or contains any path of the other
fn paths_conflict(a: &OperationKind, b: &OperationKind) -> bool {
    let b_paths = b.paths();
    a.paths()
        .into_iter()
        .any(|path| b_paths.iter().any(|other| path.overlaps(other)))
}

/// Incoming insert moved one slot right when a committed insert landed at or
/// before its index in the same array
fn shift_insert(incoming: &OperationKind, committed: &OperationKind) -> Option<OperationKind> {
    let (
        OperationKind::Insert { path, value },
        OperationKind::Insert {
            path: committed_path,
            ..
        },
    ) = (incoming, committed)
    else {
        return None;
    };

    let (last, parent) = path.split_last()?;
    let (committed_last, committed_parent) = committed_path.split_last()?;
    let index = last.as_index()?;
    let committed_index = committed_last.as_index()?;

    if parent != committed_parent || committed_index > index {
        return None;
    }

    Some(OperationKind::Insert {
        path: path.with_last(PathSegment::Index(index + 1)),
        value: value.clone(),
    })
}

fn is_double_delete(incoming: &OperationKind, committed: &OperationKind) -> bool {
    matches!(
        (incoming, committed),
        (OperationKind::Delete { path, .. }, OperationKind::Delete { path: other, .. }) if path == other
    )
}
