//! Logical clocks for operation ordering.
//!
//! Every replica is identified by a [`NodeId`]. Operations are stamped with an
//! [`OperationTimestamp`] whose total order (counter first, node id second)
//! is the last-writer-wins tie-break shared by all replicas without any
//! coordination. The [`VectorClock`] records, per origin, the highest counter
//! a document has applied. [`SeenSet`] records exactly which timestamps were
//! applied and is the duplicate-delivery filter.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Opaque replica identifier, stable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random node id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Timestamp of the originating replica at the moment an operation was created.
///
/// Ordering: higher `counter` wins; equal counters fall back to the
/// lexicographically greater `node_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationTimestamp {
    pub counter: u64,
    pub node_id: NodeId,
}

impl OperationTimestamp {
    pub fn new(counter: u64, node_id: impl Into<NodeId>) -> Self {
        Self {
            counter,
            node_id: node_id.into(),
        }
    }
}

impl Ord for OperationTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for OperationTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-replica logical counters.
///
/// Entries only ever grow: [`VectorClock::observe`] keeps the maximum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(BTreeMap<NodeId, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter recorded for `node`, zero if never seen.
    pub fn get(&self, node: &NodeId) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    /// Raise the entry for `node` to `counter` if it is higher.
    pub fn observe(&mut self, node: &NodeId, counter: u64) {
        let entry = self.0.entry(node.clone()).or_insert(0);
        if counter > *entry {
            *entry = counter;
        }
    }

    /// Pointwise maximum with another clock.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, counter) in &other.0 {
            self.observe(node, *counter);
        }
    }

    /// Highest counter recorded for any node.
    pub fn max_counter(&self) -> u64 {
        self.0.values().copied().max().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.0.iter().map(|(n, c)| (n, *c))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Every timestamp a document has accounted for, per origin.
///
/// Lamport counters from one origin have gaps and catch-up replays older
/// operations after newer ones, so a per-origin maximum cannot tell an
/// unseen operation from a duplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet(BTreeMap<NodeId, BTreeSet<u64>>);

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, ts: &OperationTimestamp) -> bool {
        self.0
            .get(&ts.node_id)
            .is_some_and(|counters| counters.contains(&ts.counter))
    }

    /// Record `ts`. Returns `false` if it was already present.
    pub fn insert(&mut self, ts: &OperationTimestamp) -> bool {
        self.0.entry(ts.node_id.clone()).or_default().insert(ts.counter)
    }

    /// Number of recorded timestamps.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
