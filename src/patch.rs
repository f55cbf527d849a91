//! Patch utilities — JSON diffs that can be applied, inverted, and shipped.
//!
//! DESIGN
//! ======
//! A patch is an ordered list of primitive operations in JSON Patch shape
//! (`add` / `remove` / `replace` / `move` with JSON-pointer paths). The
//! differ emits the minimal list that turns `before` into `after`;
//! inversion walks the list in reverse and materializes from `before` any
//! value a forward `remove` or `replace` discards, since the forward op
//! carries no value to restore. Each diffed path is touched at most once,
//! which is what makes `before`-based inversion exact.
//!
//! Application is all-or-nothing: ops run against a clone and the original
//! document is untouched on error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// TYPES
// =============================================================================

/// One primitive patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
}

impl Operation {
    /// The path this operation writes to.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Remove { path } | Self::Replace { path, .. } | Self::Move { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("invalid array index in path: {0}")]
    BadIndex(String),
    #[error("cannot descend into scalar at: {0}")]
    NotAContainer(String),
}

// =============================================================================
// POINTERS
// =============================================================================

fn segments(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn join(parent: &str, segment: &str) -> String {
    format!("{parent}/{}", escape(segment))
}

/// Borrow the value at `path`, if present.
fn value_at<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for seg in segments(path) {
        cur = match cur {
            Value::Object(map) => map.get(&seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Borrow the container holding the last segment of `path` mutably.
fn parent_of<'a>(doc: &'a mut Value, path: &str) -> Result<(&'a mut Value, String), PatchError> {
    let mut segs = segments(path);
    let Some(last) = segs.pop() else {
        return Err(PatchError::PathNotFound(path.to_owned()));
    };

    let mut cur = doc;
    for seg in segs {
        cur = match cur {
            Value::Object(map) => map
                .get_mut(&seg)
                .ok_or_else(|| PatchError::PathNotFound(path.to_owned()))?,
            Value::Array(items) => {
                let idx = seg
                    .parse::<usize>()
                    .map_err(|_| PatchError::BadIndex(path.to_owned()))?;
                items
                    .get_mut(idx)
                    .ok_or_else(|| PatchError::PathNotFound(path.to_owned()))?
            }
            _ => return Err(PatchError::NotAContainer(path.to_owned())),
        };
    }
    Ok((cur, last))
}

// =============================================================================
// APPLY
// =============================================================================

/// Apply `ops` in order to a copy of `doc` and return the result.
///
/// # Errors
///
/// Returns the first failing operation's error; the input is never
/// partially modified.
pub fn apply(doc: &Value, ops: &[Operation]) -> Result<Value, PatchError> {
    let mut out = doc.clone();
    for op in ops {
        apply_one(&mut out, op)?;
    }
    Ok(out)
}

fn apply_one(doc: &mut Value, op: &Operation) -> Result<(), PatchError> {
    match op {
        Operation::Add { path, value } => insert(doc, path, value.clone()),
        Operation::Remove { path } => take(doc, path).map(|_| ()),
        Operation::Replace { path, value } => {
            if path.is_empty() {
                *doc = value.clone();
                return Ok(());
            }
            let (parent, last) = parent_of(doc, path)?;
            match parent {
                Value::Object(map) => {
                    map.get_mut(&last)
                        .map(|slot| *slot = value.clone())
                        .ok_or_else(|| PatchError::PathNotFound(path.clone()))?;
                }
                Value::Array(items) => {
                    let idx = last
                        .parse::<usize>()
                        .map_err(|_| PatchError::BadIndex(path.clone()))?;
                    *items
                        .get_mut(idx)
                        .ok_or_else(|| PatchError::PathNotFound(path.clone()))? = value.clone();
                }
                _ => return Err(PatchError::NotAContainer(path.clone())),
            }
            Ok(())
        }
        Operation::Move { from, path } => {
            let moved = take(doc, from)?;
            insert(doc, path, moved)
        }
    }
}

fn insert(doc: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    let (parent, last) = parent_of(doc, path)?;
    match parent {
        Value::Object(map) => {
            map.insert(last, value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            let idx = last
                .parse::<usize>()
                .map_err(|_| PatchError::BadIndex(path.to_owned()))?;
            if idx > items.len() {
                return Err(PatchError::PathNotFound(path.to_owned()));
            }
            items.insert(idx, value);
            Ok(())
        }
        _ => Err(PatchError::NotAContainer(path.to_owned())),
    }
}

fn take(doc: &mut Value, path: &str) -> Result<Value, PatchError> {
    let (parent, last) = parent_of(doc, path)?;
    match parent {
        Value::Object(map) => map
            .remove(&last)
            .ok_or_else(|| PatchError::PathNotFound(path.to_owned())),
        Value::Array(items) => {
            let idx = last
                .parse::<usize>()
                .map_err(|_| PatchError::BadIndex(path.to_owned()))?;
            if idx >= items.len() {
                return Err(PatchError::PathNotFound(path.to_owned()));
            }
            Ok(items.remove(idx))
        }
        _ => Err(PatchError::NotAContainer(path.to_owned())),
    }
}

// =============================================================================
// DIFF
// =============================================================================

/// Compute the minimal ordered operation list turning `before` into `after`.
#[must_use]
pub fn diff(before: &Value, after: &Value) -> Vec<Operation> {
    let mut ops = Vec::new();
    diff_at(before, after, "", &mut ops);
    ops
}

fn diff_at(before: &Value, after: &Value, path: &str, ops: &mut Vec<Operation>) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            for key in b.keys() {
                if !a.contains_key(key) {
                    ops.push(Operation::Remove { path: join(path, key) });
                }
            }
            for (key, after_val) in a {
                match b.get(key) {
                    Some(before_val) => diff_at(before_val, after_val, &join(path, key), ops),
                    None => ops.push(Operation::Add { path: join(path, key), value: after_val.clone() }),
                }
            }
        }
        (Value::Array(b), Value::Array(a)) => {
            let shared = b.len().min(a.len());
            for i in 0..shared {
                diff_at(&b[i], &a[i], &join(path, &i.to_string()), ops);
            }
            // Tail removals run highest-index-first so earlier removals do
            // not shift the indices of later ones.
            for i in (shared..b.len()).rev() {
                ops.push(Operation::Remove { path: join(path, &i.to_string()) });
            }
            for (i, item) in a.iter().enumerate().skip(shared) {
                ops.push(Operation::Add { path: join(path, &i.to_string()), value: item.clone() });
            }
        }
        _ => {
            if before != after {
                ops.push(Operation::Replace { path: path.to_owned(), value: after.clone() });
            }
        }
    }
}

// =============================================================================
// INVERT
// =============================================================================

/// Produce the operation list that undoes `ops`, given the document the
/// forward ops were diffed against. Processes `ops` in reverse order;
/// `remove` and `replace` recover their lost values from `before`.
#[must_use]
pub fn invert(before: &Value, ops: &[Operation]) -> Vec<Operation> {
    let mut reversed = Vec::with_capacity(ops.len());
    for op in ops.iter().rev() {
        match op {
            Operation::Add { path, .. } => reversed.push(Operation::Remove { path: path.clone() }),
            Operation::Remove { path } => {
                let value = value_at(before, path).cloned().unwrap_or(Value::Null);
                reversed.push(Operation::Add { path: path.clone(), value });
            }
            Operation::Replace { path, .. } => {
                let value = value_at(before, path).cloned().unwrap_or(Value::Null);
                reversed.push(Operation::Replace { path: path.clone(), value });
            }
            Operation::Move { from, path } => {
                reversed.push(Operation::Move { from: path.clone(), path: from.clone() });
            }
        }
    }
    reversed
}

#[cfg(test)]
#[path = "patch_test.rs"]
mod tests;
