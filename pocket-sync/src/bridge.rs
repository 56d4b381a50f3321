//! Bridge between collection storage and CRDT documents.
//!
//! Field-level writes from the storage layer become per-field CRDT operations
//! on a document keyed by `(collection, document_id)`. Generated operations
//! are queued for outbound sync until acknowledged, and published on a
//! change stream. Remote operations are merged back and their results
//! published on a second stream.
//!
//! Memory is bounded by [`SyncBridge::run_garbage_collection`]:
//! - tombstoned documents whose oldest retained operation is older than
//!   `max_operation_age` are dropped entirely;
//! - documents whose oplog exceeds `compaction_threshold` are compacted to
//!   their current value. This intentionally discards history: a concurrent
//!   write older than the compaction point can no longer lose against the
//!   writes it would have conflicted with.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::{now_millis, NodeId};
use crate::document::{CrdtDocument, DocumentState, MergeResult};
use crate::events::{EventStream, Subscription};
use crate::operation::CrdtOperation;

/// Reserved root field marking a whole document as deleted.
pub const DELETED_FIELD: &str = "_deleted";

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct SyncBridgeConfig {
    /// Local replica id stamped on every generated operation
    pub node_id: NodeId,
    /// Synced collections (empty = all)
    pub collections: Vec<String>,
    /// Periodic garbage collection interval (None = manual only)
    pub gc_interval: Option<Duration>,
    /// Age after which a tombstoned document may be purged
    pub max_operation_age: Duration,
    /// Oplog length that triggers compaction
    pub compaction_threshold: usize,
}

impl Default for SyncBridgeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::random(),
            collections: Vec::new(),
            gc_interval: None,
            max_operation_age: Duration::from_secs(60 * 60),
            compaction_threshold: 1000,
        }
    }
}

/// Operation envelope exchanged between the bridge and the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    pub collection: String,
    pub document_id: String,
    pub operation: CrdtOperation,
}

/// Bridge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub document_count: usize,
    pub operation_count: usize,
    pub pending_count: usize,
    pub tombstone_count: usize,
}

/// Work done by one garbage collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub removed_documents: usize,
    pub compacted_documents: usize,
    pub freed_operations: usize,
}

/// Bridge errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Empty field path for {collection}/{document_id}")]
    InvalidPath {
        collection: String,
        document_id: String,
    },
    #[error("Sync bridge has been destroyed")]
    Destroyed,
}

type DocKey = (String, String);

#[derive(Default)]
struct BridgeState {
    documents: HashMap<DocKey, CrdtDocument>,
    pending: VecDeque<SyncOperation>,
    tombstones: HashSet<DocKey>,
    destroyed: bool,
}

impl BridgeState {
    fn document_mut(&mut self, key: &DocKey, node_id: &NodeId) -> &mut CrdtDocument {
        self.documents
            .entry(key.clone())
            .or_insert_with(|| CrdtDocument::new(key.1.clone(), node_id.clone()))
    }

    /// A document is tombstoned exactly when its root `_deleted` is `true`,
    /// whichever replica wrote it.
    fn refresh_tombstone(&mut self, key: &DocKey) {
        let deleted = self
            .documents
            .get(key)
            .is_some_and(|doc| doc.value().get(DELETED_FIELD) == Some(&Value::Bool(true)));
        if deleted {
            self.tombstones.insert(key.clone());
        } else {
            self.tombstones.remove(key);
        }
    }

    fn collect_garbage(&mut self, config: &SyncBridgeConfig, now: u64) -> GcReport {
        let mut report = GcReport::default();
        let max_age = config.max_operation_age.as_millis() as u64;

        let expired: Vec<DocKey> = self
            .tombstones
            .iter()
            .filter(|key| {
                self.documents
                    .get(*key)
                    .map_or(true, |doc| now.saturating_sub(doc.oldest_wall_time()) > max_age)
            })
            .cloned()
            .collect();

        for key in expired {
            self.tombstones.remove(&key);
            if let Some(mut doc) = self.documents.remove(&key) {
                report.freed_operations += doc.operation_count();
                report.removed_documents += 1;
                doc.dispose();
            }
        }

        for doc in self.documents.values_mut() {
            if doc.operation_count() > config.compaction_threshold {
                report.freed_operations += doc.compact();
                report.compacted_documents += 1;
            }
        }

        report
    }
}

/// CRDT sync bridge for one replica.
pub struct SyncBridge {
    config: SyncBridgeConfig,
    state: Arc<Mutex<BridgeState>>,
    changes: EventStream<SyncOperation>,
    merge_results: EventStream<MergeResult>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncBridge {
    /// Create a bridge. With `gc_interval` set and a tokio runtime available,
    /// garbage collection runs periodically in the background.
    pub fn new(config: SyncBridgeConfig) -> Self {
        let state = Arc::new(Mutex::new(BridgeState::default()));
        let gc_task = config
            .gc_interval
            .filter(|interval| !interval.is_zero())
            .and_then(|interval| Self::spawn_gc(interval, state.clone(), config.clone()));

        Self {
            config,
            state,
            changes: EventStream::new(),
            merge_results: EventStream::new(),
            gc_task: Mutex::new(gc_task),
        }
    }

    fn spawn_gc(
        interval: Duration,
        state: Arc<Mutex<BridgeState>>,
        config: SyncBridgeConfig,
    ) -> Option<JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No tokio runtime, periodic garbage collection disabled");
            return None;
        };
        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = {
                    let mut state = state.lock();
                    if state.destroyed {
                        break;
                    }
                    state.collect_garbage(&config, now_millis())
                };
                if report != GcReport::default() {
                    log::info!(
                        "Periodic GC removed {} documents, compacted {}, freed {} operations",
                        report.removed_documents,
                        report.compacted_documents,
                        report.freed_operations
                    );
                }
            }
        }))
    }

    pub fn config(&self) -> &SyncBridgeConfig {
        &self.config
    }

    fn is_synced(&self, collection: &str) -> bool {
        self.config.collections.is_empty() || self.config.collections.iter().any(|c| c == collection)
    }

    /// Turn a field-level write into one operation per field.
    pub fn process_local_write(
        &self,
        collection: &str,
        document_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Vec<SyncOperation>, BridgeError> {
        let paths = fields
            .iter()
            .map(|(field, value)| (vec![field.clone()], Some(value.clone())))
            .collect();
        self.process_local(collection, document_id, paths)
    }

    /// Delete individual field paths, or tombstone the whole document when
    /// `field_paths` is `None`.
    pub fn process_local_delete(
        &self,
        collection: &str,
        document_id: &str,
        field_paths: Option<&[Vec<String>]>,
    ) -> Result<Vec<SyncOperation>, BridgeError> {
        let paths = match field_paths {
            Some(paths) => paths.iter().map(|p| (p.clone(), None)).collect(),
            None => vec![(vec![DELETED_FIELD.to_string()], Some(Value::Bool(true)))],
        };
        self.process_local(collection, document_id, paths)
    }

    /// Shared write path: `Some(value)` sets, `None` deletes.
    fn process_local(
        &self,
        collection: &str,
        document_id: &str,
        paths: Vec<(Vec<String>, Option<Value>)>,
    ) -> Result<Vec<SyncOperation>, BridgeError> {
        if paths.iter().any(|(p, _)| p.is_empty()) {
            return Err(BridgeError::InvalidPath {
                collection: collection.to_string(),
                document_id: document_id.to_string(),
            });
        }

        let generated = {
            let mut state = self.state.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }
            if !self.is_synced(collection) {
                log::debug!("Ignoring write to unsynced collection {collection}");
                return Ok(Vec::new());
            }

            let key = (collection.to_string(), document_id.to_string());
            let mut generated = Vec::with_capacity(paths.len());
            {
                let doc = state.document_mut(&key, &self.config.node_id);
                for (path, value) in paths {
                    let op = match value {
                        Some(value) => doc.set(&path, value),
                        None => doc.delete(&path),
                    };
                    if let Some(operation) = op {
                        generated.push(SyncOperation {
                            collection: collection.to_string(),
                            document_id: document_id.to_string(),
                            operation,
                        });
                    }
                }
            }

            state.refresh_tombstone(&key);
            state.pending.extend(generated.iter().cloned());
            generated
        };

        for sync_op in &generated {
            self.changes.publish(sync_op.clone());
        }
        Ok(generated)
    }

    /// Merge operations received from the network, in order.
    pub fn apply_remote_operations(&self, ops: &[SyncOperation]) -> Result<Vec<MergeResult>, BridgeError> {
        let results = {
            let mut state = self.state.lock();
            if state.destroyed {
                return Err(BridgeError::Destroyed);
            }

            let mut results = Vec::with_capacity(ops.len());
            for sync_op in ops {
                if sync_op.operation.path.is_empty() {
                    log::debug!("Dropping remote operation {} with empty path", sync_op.operation.id);
                    continue;
                }
                if !self.is_synced(&sync_op.collection) {
                    continue;
                }
                let key = (sync_op.collection.clone(), sync_op.document_id.clone());
                let doc = state.document_mut(&key, &self.config.node_id);
                let result = doc.apply_remote(&sync_op.operation);
                state.refresh_tombstone(&key);
                results.push(result);
            }
            results
        };

        for result in &results {
            self.merge_results.publish(result.clone());
        }
        Ok(results)
    }

    /// Materialized document, or `None` if unknown or tombstoned.
    pub fn get_document(&self, collection: &str, document_id: &str) -> Option<Value> {
        let state = self.state.lock();
        let key = (collection.to_string(), document_id.to_string());
        if state.tombstones.contains(&key) {
            return None;
        }
        state.documents.get(&key).map(|doc| doc.value().clone())
    }

    /// Oplog and clock of a document, for catch-up responses.
    pub fn document_state(&self, collection: &str, document_id: &str) -> Option<DocumentState> {
        let state = self.state.lock();
        state
            .documents
            .get(&(collection.to_string(), document_id.to_string()))
            .map(CrdtDocument::state)
    }

    pub fn is_tombstoned(&self, collection: &str, document_id: &str) -> bool {
        self.state
            .lock()
            .tombstones
            .contains(&(collection.to_string(), document_id.to_string()))
    }

    /// Outbound queue, oldest first.
    pub fn get_pending_operations(&self) -> Vec<SyncOperation> {
        self.state.lock().pending.iter().cloned().collect()
    }

    /// Remove acknowledged operations from the pending queue.
    pub fn acknowledge_operations<S: AsRef<str>>(&self, ids: &[S]) {
        let mut state = self.state.lock();
        let acked: HashSet<&str> = ids.iter().map(|id| id.as_ref()).collect();
        state
            .pending
            .retain(|s| !acked.contains(s.operation.id.as_str()));
        for doc in state.documents.values_mut() {
            doc.acknowledge_ops(ids);
        }
    }

    /// Purge expired tombstones and compact oversized oplogs.
    pub fn run_garbage_collection(&self) -> GcReport {
        self.collect_garbage_at(now_millis())
    }

    fn collect_garbage_at(&self, now: u64) -> GcReport {
        let report = self.state.lock().collect_garbage(&self.config, now);
        if report != GcReport::default() {
            log::info!(
                "GC removed {} documents, compacted {}, freed {} operations",
                report.removed_documents,
                report.compacted_documents,
                report.freed_operations
            );
        }
        report
    }

    pub fn stats(&self) -> BridgeStats {
        let state = self.state.lock();
        BridgeStats {
            document_count: state.documents.len(),
            operation_count: state.documents.values().map(CrdtDocument::operation_count).sum(),
            pending_count: state.pending.len(),
            tombstone_count: state.tombstones.len(),
        }
    }

    /// Locally generated operations.
    pub fn changes(&self) -> Subscription<SyncOperation> {
        self.changes.subscribe()
    }

    /// Results of merged remote operations.
    pub fn merge_results(&self) -> Subscription<MergeResult> {
        self.merge_results.subscribe()
    }

    /// Stop the GC timer, dispose every document and complete both streams.
    pub fn destroy(&self) {
        if let Some(task) = self.gc_task.lock().take() {
            task.abort();
        }
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            for doc in state.documents.values_mut() {
                doc.dispose();
            }
            state.documents.clear();
            state.pending.clear();
            state.tombstones.clear();
        }
        self.changes.complete();
        self.merge_results.complete();
        log::debug!("Sync bridge for node {} destroyed", self.config.node_id);
    }
}

impl Drop for SyncBridge {
    fn drop(&mut self) {
        if let Some(task) = self.gc_task.lock().take() {
            task.abort();
        }
    }
}
