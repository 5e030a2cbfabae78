//! Path resolution over JSON trees

use serde_json::{Map, Value};

use crate::models::{Path, PathSegment};

/// Read the value at `path`, if every segment resolves
pub fn value_at<'a>(document: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.segments() {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Walk `parent` and return the container it addresses.
///
/// With `create`, missing (or null) object members are filled with empty
/// objects on the way down. Array positions are never created, and a segment
/// whose kind does not match the container resolves to `None`.
pub(super) fn container_mut<'a>(
    document: &'a mut Value,
    parent: &[PathSegment],
    create: bool,
) -> Option<&'a mut Value> {
    let mut current = document;
    for segment in parent {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => {
                if create {
                    let slot = map.entry(key.clone()).or_insert(Value::Null);
                    if slot.is_null() {
                        *slot = Value::Object(Map::new());
                    }
                    slot
                } else {
                    map.get_mut(key)?
                }
            }
            (PathSegment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_value_at_nested() {
        let doc = json!({"steps": [{"name": "fetch"}, {"name": "store"}]});
        let path = Path::root().key("steps").index(1).key("name");
        assert_eq!(value_at(&doc, &path), Some(&json!("store")));
        assert_eq!(value_at(&doc, &Path::root()), Some(&doc));
    }

    #[test]
    fn test_value_at_mismatched_segment() {
        let doc = json!({"steps": [1, 2]});
        assert_eq!(value_at(&doc, &Path::root().key("steps").key("0")), None);
        assert_eq!(value_at(&doc, &Path::root().index(0)), None);
        assert_eq!(value_at(&doc, &Path::root().key("steps").end()), None);
    }

    #[test]
    fn test_container_mut_creates_objects() {
        let mut doc = json!({"meta": null});
        let parent = Path::root().key("meta").key("labels");
        let container = container_mut(&mut doc, parent.segments(), true).unwrap();
        assert_eq!(container, &json!({}));
        assert_eq!(doc, json!({"meta": {"labels": {}}}));
    }

    #[test]
    fn test_container_mut_without_create() {
        let mut doc = json!({});
        let parent = Path::root().key("missing");
        assert!(container_mut(&mut doc, parent.segments(), false).is_none());
        assert_eq!(doc, json!({}));
    }

    #[test]
    fn test_container_mut_does_not_create_array_slots() {
        let mut doc = json!({"items": []});
        let parent = Path::root().key("items").index(0);
        assert!(container_mut(&mut doc, parent.segments(), true).is_none());
    }
}
