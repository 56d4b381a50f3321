//! Operation-based JSON CRDT document.
//!
//! ```text
//!  local set/delete                      remote op
//!        │                                   │
//!        ▼                                   ▼
//!  next Lamport counter              seen.contains? ──yes──► duplicate
//!        │                                   │ no
//!        │                                   ▼
//!        │                        register[path] newer? ──yes──► conflicted
//!        │                                   │ no
//!        ▼                                   ▼
//!  ┌──────────────────────────────────────────────────┐
//!  │ registers: path → winning op (LWW per path)      │
//!  │ value = base ⊕ registers replayed in total order │
//!  │ operations: append-only oplog                    │
//!  └──────────────────────────────────────────────────┘
//! ```
//!
//! The materialized value is always the replay of the winning operation of
//! every path over the base value, sorted by [`OperationTimestamp`]. Most
//! operations are the newest the document has seen and are applied in place;
//! an older one that still wins its own path triggers a full replay so that
//! writes to a path and to its ancestors converge in any delivery order.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::clock::{now_millis, NodeId, OperationTimestamp, SeenSet, VectorClock};
use crate::operation::{get_path, CrdtOperation, OperationKind};

/// Callback invoked with every locally generated operation.
pub type LocalChangeHook = Box<dyn Fn(&CrdtOperation) + Send + Sync>;

/// A document shared between the session, its transports and the host.
pub type SharedDocument = Arc<Mutex<CrdtDocument>>;

/// Outcome of applying one remote operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    /// `false` when the operation was a duplicate or lost its path.
    pub applied: bool,
    pub value: Value,
    /// `true` when a newer write already owns the operation's path.
    pub conflicted: bool,
}

/// Oplog and clock snapshot, sent in sync responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub operations: Vec<CrdtOperation>,
    pub vclock: VectorClock,
}

/// A JSON object value replicated through last-writer-wins operations.
pub struct CrdtDocument {
    document_id: String,
    local_node: NodeId,
    /// Value the registers are replayed over (seed or last compaction).
    base: Value,
    /// Wall-clock time `base` was established.
    base_time: u64,
    value: Value,
    operations: Vec<CrdtOperation>,
    vclock: VectorClock,
    /// Every timestamp applied or discarded as conflicted.
    seen: SeenSet,
    /// Highest counter observed from any origin.
    lamport: u64,
    registers: HashMap<Vec<String>, CrdtOperation>,
    /// Timestamp of the newest register.
    head: Option<OperationTimestamp>,
    acknowledged: HashSet<String>,
    local_hook: Option<LocalChangeHook>,
    disposed: bool,
}

impl CrdtDocument {
    /// Create an empty document (`{}`).
    pub fn new(document_id: impl Into<String>, local_node: NodeId) -> Self {
        Self::with_value(document_id, local_node, Value::Object(Map::new()))
    }

    /// Create a document seeded with `initial`.
    ///
    /// Documents are object-valued; any other seed starts as `{}`.
    pub fn with_value(document_id: impl Into<String>, local_node: NodeId, initial: Value) -> Self {
        let document_id = document_id.into();
        let base = if initial.is_object() {
            initial
        } else {
            log::debug!("Document {document_id} seeded with a non-object value, starting empty");
            Value::Object(Map::new())
        };
        Self {
            document_id,
            local_node,
            value: base.clone(),
            base,
            base_time: now_millis(),
            operations: Vec::new(),
            vclock: VectorClock::new(),
            seen: SeenSet::new(),
            lamport: 0,
            registers: HashMap::new(),
            head: None,
            acknowledged: HashSet::new(),
            local_hook: None,
            disposed: false,
        }
    }

    /// Wrap into a [`SharedDocument`].
    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local_node
    }

    /// Register the hook fired for every local operation (replaces any previous one).
    pub fn on_local_change(&mut self, hook: LocalChangeHook) {
        self.local_hook = Some(hook);
    }

    /// Write `value` at `path` and return the operation to broadcast.
    ///
    /// Returns `None` only on a disposed document.
    pub fn set(&mut self, path: &[String], value: Value) -> Option<CrdtOperation> {
        if self.disposed {
            log::warn!("set on disposed document {}", self.document_id);
            return None;
        }
        let ts = self.next_timestamp();
        let op = CrdtOperation::update(ts, path.to_vec(), value, now_millis());
        self.commit_local(op)
    }

    /// Remove the key at `path`.
    ///
    /// Returns `None` (nothing to broadcast) when the path does not exist.
    pub fn delete(&mut self, path: &[String]) -> Option<CrdtOperation> {
        if self.disposed {
            log::warn!("delete on disposed document {}", self.document_id);
            return None;
        }
        if path.is_empty() || get_path(&self.value, path).is_none() {
            return None;
        }
        let ts = self.next_timestamp();
        let op = CrdtOperation::delete(ts, path.to_vec(), now_millis());
        self.commit_local(op)
    }

    fn next_timestamp(&mut self) -> OperationTimestamp {
        self.lamport += 1;
        OperationTimestamp::new(self.lamport, self.local_node.clone())
    }

    fn commit_local(&mut self, op: CrdtOperation) -> Option<CrdtOperation> {
        self.integrate(op.clone());
        if let Some(hook) = &self.local_hook {
            hook(&op);
        }
        Some(op)
    }

    /// Merge an operation produced by another replica.
    pub fn apply_remote(&mut self, op: &CrdtOperation) -> MergeResult {
        if self.disposed || self.seen.contains(&op.timestamp) {
            return self.result(false, false);
        }

        let superseded = self
            .registers
            .get(&op.path)
            .is_some_and(|current| current.timestamp >= op.timestamp);
        if superseded {
            self.seen.insert(&op.timestamp);
            self.vclock.observe(&op.timestamp.node_id, op.timestamp.counter);
            self.lamport = self.lamport.max(op.timestamp.counter);
            return self.result(false, true);
        }

        self.integrate(op.clone());
        self.result(true, false)
    }

    /// Record a winning operation and update the materialized value.
    fn integrate(&mut self, op: CrdtOperation) {
        // A set leaves the parent objects it created behind; a delete that
        // replaces it must not inherit them, so it always replays.
        let replaces_set = op.kind == OperationKind::Delete
            && self
                .registers
                .get(&op.path)
                .is_some_and(|current| current.kind == OperationKind::Update);
        let in_order = !replaces_set && self.head.as_ref().map_or(true, |head| op.timestamp > *head);

        self.seen.insert(&op.timestamp);
        self.vclock.observe(&op.timestamp.node_id, op.timestamp.counter);
        self.lamport = self.lamport.max(op.timestamp.counter);
        if in_order {
            op.apply_to(&mut self.value);
            self.head = Some(op.timestamp.clone());
        }
        self.registers.insert(op.path.clone(), op.clone());
        self.operations.push(op);

        if !in_order {
            self.rematerialize();
        }
    }

    /// Rebuild `value` by replaying every register over the base.
    fn rematerialize(&mut self) {
        let mut winners: Vec<&CrdtOperation> = self.registers.values().collect();
        winners.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let mut value = self.base.clone();
        for op in &winners {
            op.apply_to(&mut value);
        }
        self.head = winners.last().map(|op| op.timestamp.clone());
        self.value = value;
    }

    fn result(&self, applied: bool, conflicted: bool) -> MergeResult {
        MergeResult {
            applied,
            value: self.value.clone(),
            conflicted,
        }
    }

    /// Current materialized value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Oplog and vector clock snapshot.
    pub fn state(&self) -> DocumentState {
        DocumentState {
            operations: self.operations.clone(),
            vclock: self.vclock.clone(),
        }
    }

    pub fn operations(&self) -> &[CrdtOperation] {
        &self.operations
    }

    pub fn vclock(&self) -> &VectorClock {
        &self.vclock
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Mark operations as delivered everywhere; they stay in the oplog
    /// until the next compaction.
    pub fn acknowledge_ops<S: AsRef<str>>(&mut self, ids: &[S]) {
        for id in ids {
            let id = id.as_ref();
            if self.operations.iter().any(|op| op.id == id) {
                self.acknowledged.insert(id.to_string());
            }
        }
    }

    pub fn acknowledged_count(&self) -> usize {
        self.acknowledged.len()
    }

    /// Wall-clock time of the oldest retained operation, or of the base
    /// value when the oplog is empty.
    pub fn oldest_wall_time(&self) -> u64 {
        self.operations
            .iter()
            .map(|op| op.wall_time)
            .min()
            .unwrap_or(self.base_time)
    }

    /// Drop the oplog and per-path registers, keeping the current value as
    /// the new base. Returns the number of operations discarded.
    ///
    /// Clocks and the seen set are kept so duplicates are still filtered and local counters
    /// keep growing. Conflicts against writes older than the compaction
    /// point can no longer be resolved: such a write arriving later is
    /// applied over the compacted value.
    pub fn compact(&mut self) -> usize {
        let freed = self.operations.len();
        self.base = self.value.clone();
        self.base_time = now_millis();
        self.operations.clear();
        self.registers.clear();
        self.acknowledged.clear();
        self.head = None;
        freed
    }

    /// Release resources. The document ignores every later mutation.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.local_hook = None;
        self.operations.clear();
        self.registers.clear();
        self.acknowledged.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl std::fmt::Debug for CrdtDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrdtDocument")
            .field("document_id", &self.document_id)
            .field("local_node", &self.local_node)
            .field("value", &self.value)
            .field("operations", &self.operations.len())
            .field("vclock", &self.vclock)
            .finish()
    }
}
