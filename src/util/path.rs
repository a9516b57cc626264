//! Path access into JSON trees
//!
//! Segments address object fields ([`PathSegment::Key`]) or array slots
//! ([`PathSegment::Index`]). An index applied to an object reads the stringified
//! key, so `{"0": x}` is reachable as `foo.0`.
//!
//! Writes create missing containers: an index segment creates an array, a key
//! segment creates an object.

use serde_json::{Map, Value};

use crate::binding::PathSegment;

/// Read the value at `path`
///
/// Uses references internally, callers clone only what they keep.
pub fn get_in<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut current = value;

    for segment in path {
        current = match (segment, current) {
            (PathSegment::Key(name), Value::Object(map)) => map.get(name)?,
            (PathSegment::Index(idx), Value::Object(map)) => map.get(&idx.to_string())?,
            (PathSegment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            _ => return None,
        };
    }

    Some(current)
}

fn container_for(segment: &PathSegment) -> Value {
    match segment {
        PathSegment::Index(_) => Value::Array(Vec::new()),
        PathSegment::Key(_) => Value::Object(Map::new()),
    }
}

fn slot<'a>(current: &'a mut Value, segment: &PathSegment) -> &'a mut Value {
    let fits = matches!(
        (segment, &*current),
        (_, Value::Object(_)) | (PathSegment::Index(_), Value::Array(_))
    );
    if !fits {
        *current = container_for(segment);
    }

    match (segment, current) {
        (PathSegment::Index(idx), Value::Array(items)) => {
            if items.len() <= *idx {
                items.resize(idx + 1, Value::Null);
            }
            &mut items[*idx]
        }
        (segment, Value::Object(map)) => map.entry(segment.to_string()).or_insert(Value::Null),
        // `fits` guarantees a container above
        (_, other) => other,
    }
}

/// Write `new_value` at `path`, creating intermediate containers
pub fn set_in(target: &mut Value, path: &[PathSegment], new_value: Value) {
    let mut current = target;

    for (position, segment) in path.iter().enumerate() {
        if current.is_null() {
            *current = container_for(segment);
        }
        current = slot(current, segment);

        if position + 1 < path.len() && !matches!(current, Value::Object(_) | Value::Array(_)) {
            *current = Value::Null;
        }
    }

    *current = new_value;
}

/// Remove the value at `path`; array slots are spliced out
///
/// Returns whether something was removed.
pub fn delete_in(target: &mut Value, path: &[PathSegment]) -> bool {
    let Some((last, parents)) = path.split_last() else {
        let existed = !target.is_null();
        *target = Value::Null;
        return existed;
    };

    let mut current = target;
    for segment in parents {
        let next = match (segment, current) {
            (PathSegment::Key(name), Value::Object(map)) => map.get_mut(name),
            (PathSegment::Index(idx), Value::Object(map)) => map.get_mut(&idx.to_string()),
            (PathSegment::Index(idx), Value::Array(items)) => items.get_mut(*idx),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return false,
        }
    }

    match (last, current) {
        (PathSegment::Key(name), Value::Object(map)) => map.remove(name).is_some(),
        (PathSegment::Index(idx), Value::Object(map)) => map.remove(&idx.to_string()).is_some(),
        (PathSegment::Index(idx), Value::Array(items)) if *idx < items.len() => {
            items.remove(*idx);
            true
        }
        _ => false,
    }
}

/// Append to the array at `path`
///
/// An array item is concatenated, anything else is pushed. A missing or
/// non-array slot becomes a fresh array.
pub fn add_last(target: &mut Value, path: &[PathSegment], item: Value) {
    let existing = get_in(target, path).cloned();
    let mut items = match existing {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    };

    match item {
        Value::Array(more) => items.extend(more),
        other => items.push(other),
    }

    set_in(target, path, Value::Array(items));
}
