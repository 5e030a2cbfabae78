//! Pure application of operations to resource documents
//!
//! [`apply`] never mutates its input. It works on a structural copy, so an
//! operation that is later rejected or superseded cannot corrupt the canonical
//! document held by the store. Operations addressing a path that does not
//! resolve are no-ops and return the document unchanged.

mod resolve;

use serde_json::Value;

use crate::models::{OperationKind, Path, PathSegment};

pub use resolve::value_at;

/// Apply `operation` to `document`, returning the new document
#[must_use]
pub fn apply(document: &Value, operation: &OperationKind) -> Value {
    let mut next = document.clone();
    if apply_in_place(&mut next, operation) {
        next
    } else {
        document.clone()
    }
}

/// Rebuild a document by applying `operations` in order to `initial`
#[must_use]
pub fn replay<'a>(initial: &Value, operations: impl IntoIterator<Item = &'a OperationKind>) -> Value {
    operations
        .into_iter()
        .fold(initial.clone(), |document, operation| apply(&document, operation))
}

/// Returns `false` when the operation turned out to be a no-op. The document
/// may then hold intermediate containers created along the way, so callers
/// must discard it.
fn apply_in_place(document: &mut Value, operation: &OperationKind) -> bool {
    match operation {
        OperationKind::Insert { path, value } => insert(document, path, value.clone()),
        OperationKind::Update { path, value, .. } => update(document, path, value.clone()),
        OperationKind::Delete { path, .. } => remove(document, path).is_some(),
        OperationKind::Move { from, to } => relocate(document, from, to),
    }
}

fn insert(document: &mut Value, path: &Path, value: Value) -> bool {
    let Some((last, parent)) = path.split_last() else {
        *document = value;
        return true;
    };
    let Some(container) = resolve::container_mut(document, parent, true) else {
        return false;
    };

    match (container, last) {
        (Value::Array(items), PathSegment::Index(index)) => {
            let at = (*index).min(items.len());
            items.insert(at, value);
        }
        (Value::Array(items), PathSegment::End) => items.push(value),
        (Value::Object(map), PathSegment::Key(key)) => {
            map.insert(key.clone(), value);
        }
        _ => return false,
    }
    true
}

fn update(document: &mut Value, path: &Path, value: Value) -> bool {
    let Some((last, parent)) = path.split_last() else {
        *document = value;
        return true;
    };
    let Some(container) = resolve::container_mut(document, parent, true) else {
        return false;
    };

    match (container, last) {
        (Value::Array(items), PathSegment::Index(index)) => match items.get_mut(*index) {
            Some(slot) => *slot = value,
            None => items.push(value),
        },
        (Value::Array(items), PathSegment::End) => items.push(value),
        (Value::Object(map), PathSegment::Key(key)) => {
            map.insert(key.clone(), value);
        }
        _ => return false,
    }
    true
}

/// Detach and return the value at `path`
fn remove(document: &mut Value, path: &Path) -> Option<Value> {
    let Some((last, parent)) = path.split_last() else {
        return Some(std::mem::take(document));
    };
    let container = resolve::container_mut(document, parent, false)?;

    match (container, last) {
        (Value::Array(items), PathSegment::Index(index)) if *index < items.len() => {
            Some(items.remove(*index))
        }
        (Value::Object(map), PathSegment::Key(key)) => map.shift_remove(key),
        _ => None,
    }
}

fn relocate(document: &mut Value, from: &Path, to: &Path) -> bool {
    if from.is_root() || to.is_root() || from.is_prefix_of(to) {
        return false;
    }
    let Some(value) = remove(document, from) else {
        return false;
    };
    insert(document, to, value)
}
