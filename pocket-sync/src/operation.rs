//! CRDT operations and the JSON path primitives they apply with.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::{NodeId, OperationTimestamp};

/// Kind of mutation carried by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Update,
    Delete,
}

/// A single immutable document mutation.
///
/// `id` is derived from `(node_id, counter)` so duplicate delivery is
/// detectable on every replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdtOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub timestamp: OperationTimestamp,
    pub origin: NodeId,
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Wall-clock creation time (ms since UNIX epoch), used for GC age.
    #[serde(default)]
    pub wall_time: u64,
}

impl CrdtOperation {
    pub fn update(timestamp: OperationTimestamp, path: Vec<String>, value: Value, wall_time: u64) -> Self {
        Self::build(OperationKind::Update, timestamp, path, Some(value), wall_time)
    }

    pub fn delete(timestamp: OperationTimestamp, path: Vec<String>, wall_time: u64) -> Self {
        Self::build(OperationKind::Delete, timestamp, path, None, wall_time)
    }

    fn build(
        kind: OperationKind,
        timestamp: OperationTimestamp,
        path: Vec<String>,
        value: Option<Value>,
        wall_time: u64,
    ) -> Self {
        Self {
            id: operation_id(&timestamp.node_id, timestamp.counter),
            kind,
            origin: timestamp.node_id.clone(),
            timestamp,
            path,
            value,
            wall_time,
        }
    }

    /// Apply this operation to a materialized value.
    pub fn apply_to(&self, target: &mut Value) {
        match self.kind {
            OperationKind::Update => {
                set_path(target, &self.path, self.value.clone().unwrap_or(Value::Null))
            }
            OperationKind::Delete => {
                remove_path(target, &self.path);
            }
        }
    }
}

/// Deterministic operation id for `(node, counter)`.
pub fn operation_id(node: &NodeId, counter: u64) -> String {
    format!("{node}:{counter}")
}

/// Write `value` at `path`, creating (or replacing non-object) intermediates.
///
/// An empty path is ignored; callers reject it before building operations.
pub fn set_path(target: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = target;
    for key in parents {
        cursor = ensure_object(cursor)
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(cursor).insert(last.clone(), value);
}

/// Remove the key at `path`. Returns whether anything was removed.
pub fn remove_path(target: &mut Value, path: &[String]) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let mut cursor = target;
    for key in parents {
        match cursor.get_mut(key.as_str()) {
            Some(next) => cursor = next,
            None => return false,
        }
    }
    match cursor.as_object_mut() {
        Some(map) => map.remove(last).is_some(),
        None => false,
    }
}

/// Look up the value at `path`.
pub fn get_path<'a>(target: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(target, |cursor, key| cursor.as_object()?.get(key))
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Build an owned path from string slices.
pub fn path<S: AsRef<str>>(segments: &[S]) -> Vec<String> {
    segments.iter().map(|s| s.as_ref().to_string()).collect()
}
