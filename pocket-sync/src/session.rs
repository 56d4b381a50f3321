//! Collaborative session manager.
//!
//! Owns a set of named documents for one local node and keeps them in sync
//! with every peer reachable over the configured transports.
//!
//! ```text
//!  doc.set() ─► local hook ─► sync/operation ─► every transport
//!
//!  transport ─► handle_message ─┬─ sync/operation     ─► apply_remote ─► operation:remote
//!                               ├─ sync/sync-request  ─► reply with oplog
//!                               ├─ sync/sync-response ─► apply_remote* ─► sync:complete
//!                               ├─ peer-join/leave    ─► peer table    ─► peer:join / peer:leave
//!                               └─ awareness          ─► peer table    ─► awareness:update
//! ```
//!
//! Lock order is session state, then document. The local hook sends while
//! the document lock is held; this is safe because `send` never blocks and
//! transports deliver on their own reader tasks, so a handler never
//! re-enters the session from inside `send`.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::NodeId;
use crate::document::{CrdtDocument, MergeResult, SharedDocument};
use crate::events::{EventStream, Subscription};
use crate::operation::CrdtOperation;
use crate::presence::{PeerInfo, PresenceTable, RemoteAwareness};
use crate::protocol::{AwarenessState, SyncMessage, TransportMessage};
use crate::transport::{Transport, TransportError, Unsubscribe};

/// Default period of the awareness re-broadcast.
pub const DEFAULT_AWARENESS_INTERVAL: Duration = Duration::from_millis(3000);

/// Session configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// Local node id; a random UUID when `None`
    pub node_id: Option<NodeId>,
    pub transports: Vec<Arc<dyn Transport>>,
    /// Broadcast `peer-join` on start
    pub announce_presence: bool,
    /// Period of the local awareness re-broadcast (zero disables it)
    pub awareness_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            transports: Vec::new(),
            announce_presence: true,
            awareness_interval: DEFAULT_AWARENESS_INTERVAL,
        }
    }
}

/// Everything the host can observe on [`SessionManager::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PeerJoin {
        node_id: NodeId,
    },
    PeerLeave {
        node_id: NodeId,
    },
    OperationRemote {
        document_id: String,
        operation: CrdtOperation,
        result: MergeResult,
    },
    AwarenessUpdate {
        node_id: NodeId,
        state: AwarenessState,
    },
    SyncComplete {
        document_id: String,
        from: NodeId,
        /// Operations from the response that changed the document
        applied: usize,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::PeerJoin { .. } => "peer:join",
            SessionEvent::PeerLeave { .. } => "peer:leave",
            SessionEvent::OperationRemote { .. } => "operation:remote",
            SessionEvent::AwarenessUpdate { .. } => "awareness:update",
            SessionEvent::SyncComplete { .. } => "sync:complete",
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub local_node_id: NodeId,
    /// At least one transport is connected
    pub connected: bool,
    pub running: bool,
    pub peers: BTreeMap<NodeId, PeerInfo>,
    pub document_ids: Vec<String>,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Document already exists: {0}")]
    DuplicateDocument(String),
    #[error("Document not found: {0}")]
    DocumentNotFound(String),
    #[error("Path must contain at least one key")]
    InvalidPath,
    #[error("Session has been disposed")]
    Disposed,
}

struct SessionState {
    documents: BTreeMap<String, SharedDocument>,
    presence: PresenceTable,
    local_awareness: Option<AwarenessState>,
    running: bool,
    disposed: bool,
    awareness_task: Option<JoinHandle<()>>,
    subscriptions: Vec<Unsubscribe>,
}

struct SessionInner {
    node_id: NodeId,
    transports: Vec<Arc<dyn Transport>>,
    announce_presence: bool,
    awareness_interval: Duration,
    state: Mutex<SessionState>,
    events: EventStream<SessionEvent>,
}

/// Top-level façade over documents, transports and presence.
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let node_id = config.node_id.unwrap_or_else(NodeId::random);
        Self {
            inner: Arc::new(SessionInner {
                transports: config.transports,
                announce_presence: config.announce_presence,
                awareness_interval: config.awareness_interval,
                state: Mutex::new(SessionState {
                    documents: BTreeMap::new(),
                    presence: PresenceTable::new(node_id.clone()),
                    local_awareness: None,
                    running: false,
                    disposed: false,
                    awareness_task: None,
                    subscriptions: Vec::new(),
                }),
                events: EventStream::new(),
                node_id,
            }),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    // ── Documents ────────────────────────────────────────────────

    /// Create a document owned by this session. Local edits made through
    /// the returned handle are broadcast to every transport.
    pub fn create_document(
        &self,
        id: impl Into<String>,
        initial: Option<Value>,
    ) -> Result<SharedDocument, SessionError> {
        let id = id.into();
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(SessionError::Disposed);
        }
        if state.documents.contains_key(&id) {
            return Err(SessionError::DuplicateDocument(id));
        }

        let node_id = self.inner.node_id.clone();
        let mut document = match initial {
            Some(value) => CrdtDocument::with_value(id.clone(), node_id.clone(), value),
            None => CrdtDocument::new(id.clone(), node_id.clone()),
        };
        let transports = self.inner.transports.clone();
        let document_id = id.clone();
        document.on_local_change(Box::new(move |op: &CrdtOperation| {
            let message = TransportMessage::operation(document_id.clone(), node_id.clone(), op.clone());
            broadcast_over(&transports, &message);
        }));

        let shared = document.into_shared();
        state.documents.insert(id.clone(), shared.clone());
        log::debug!("Session {} created document {id}", self.inner.node_id);
        Ok(shared)
    }

    pub fn document(&self, id: &str) -> Option<SharedDocument> {
        self.inner.document(id)
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.inner.state.lock().documents.keys().cloned().collect()
    }

    /// Dispose and forget a document. Returns `false` if it did not exist.
    pub fn remove_document(&self, id: &str) -> bool {
        let removed = self.inner.state.lock().documents.remove(id);
        match removed {
            Some(document) => {
                document.lock().dispose();
                true
            }
            None => false,
        }
    }

    /// Write `value` at `path` in document `id` and broadcast the operation.
    pub fn set(&self, id: &str, path: &[String], value: Value) -> Result<CrdtOperation, SessionError> {
        let document = self.checked_document(id, path)?;
        let op = document.lock().set(path, value);
        op.ok_or(SessionError::Disposed)
    }

    /// Delete `path` in document `id`. `Ok(None)` when the path is absent.
    pub fn delete(&self, id: &str, path: &[String]) -> Result<Option<CrdtOperation>, SessionError> {
        let document = self.checked_document(id, path)?;
        let op = document.lock().delete(path);
        Ok(op)
    }

    fn checked_document(&self, id: &str, path: &[String]) -> Result<SharedDocument, SessionError> {
        if path.is_empty() {
            return Err(SessionError::InvalidPath);
        }
        let state = self.inner.state.lock();
        if state.disposed {
            return Err(SessionError::Disposed);
        }
        state
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::DocumentNotFound(id.to_string()))
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Connect every transport and announce this node. A no-op while
    /// running. Transports that fail to connect are logged and skipped.
    pub fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let mut subscriptions = Vec::with_capacity(inner.transports.len());
        {
            let state = inner.state.lock();
            if state.disposed {
                return Err(SessionError::Disposed);
            }
            if state.running {
                return Ok(());
            }
        }

        for transport in &inner.transports {
            let session = Arc::downgrade(inner);
            let via = Arc::downgrade(transport);
            subscriptions.push(transport.on_message(Arc::new(move |message: &TransportMessage| {
                if let Some(session) = session.upgrade() {
                    session.handle_message(message, &via);
                }
            })));
            if let Err(e) = transport.connect() {
                log::warn!("Session {}: {} failed to connect: {e}", inner.node_id, transport.name());
            }
        }

        {
            let mut state = inner.state.lock();
            state.running = true;
            state.subscriptions = subscriptions;
            if state.local_awareness.is_some() && state.awareness_task.is_none() {
                state.awareness_task = spawn_awareness_timer(inner);
            }
        }

        if inner.announce_presence {
            inner.broadcast(&TransportMessage::peer_join(inner.node_id.clone()));
        }
        log::info!(
            "Session {} started with {} transport(s)",
            inner.node_id,
            inner.transports.len()
        );
        Ok(())
    }

    /// Announce departure and disconnect every transport. A no-op while
    /// stopped.
    pub fn stop(&self) {
        let inner = &self.inner;
        let (timer, subscriptions) = {
            let mut state = inner.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            (state.awareness_task.take(), std::mem::take(&mut state.subscriptions))
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        inner.broadcast(&TransportMessage::peer_leave(inner.node_id.clone()));
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        for transport in &inner.transports {
            transport.disconnect();
        }
        log::info!("Session {} stopped", inner.node_id);
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Stop, dispose every document and complete the event stream.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        if self.inner.state.lock().disposed {
            return;
        }
        self.stop();

        let documents = {
            let mut state = self.inner.state.lock();
            state.disposed = true;
            state.local_awareness = None;
            state.presence.clear();
            std::mem::take(&mut state.documents)
        };
        for document in documents.values() {
            document.lock().dispose();
        }
        self.inner.events.complete();
        log::debug!("Session {} disposed", self.inner.node_id);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    // ── Sync ─────────────────────────────────────────────────────

    /// Ask every peer holding `id` for its oplog. Returns the number of
    /// transports the request went out on; with no respondent nothing
    /// ever comes back.
    pub fn request_sync(&self, id: &str) -> Result<usize, SessionError> {
        {
            let state = self.inner.state.lock();
            if state.disposed {
                return Err(SessionError::Disposed);
            }
            if !state.documents.contains_key(id) {
                return Err(SessionError::DocumentNotFound(id.to_string()));
            }
        }
        Ok(self
            .inner
            .broadcast(&TransportMessage::sync_request(id, self.inner.node_id.clone())))
    }

    // ── Presence ─────────────────────────────────────────────────

    /// Store the local awareness state, broadcast it now and keep
    /// re-broadcasting it while the session runs.
    pub fn set_local_awareness(&self, awareness: AwarenessState) -> Result<(), SessionError> {
        {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(SessionError::Disposed);
            }
            state.local_awareness = Some(awareness.clone());
            if state.running && state.awareness_task.is_none() {
                state.awareness_task = spawn_awareness_timer(&self.inner);
            }
        }
        self.inner
            .broadcast(&TransportMessage::awareness(self.inner.node_id.clone(), awareness));
        Ok(())
    }

    pub fn local_awareness(&self) -> Option<AwarenessState> {
        self.inner.state.lock().local_awareness.clone()
    }

    /// Every peer heard from, ordered by node id.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner.state.lock().presence.peers().values().cloned().collect()
    }

    pub fn awareness(&self, node_id: &NodeId) -> Option<RemoteAwareness> {
        self.inner.state.lock().presence.awareness(node_id).cloned()
    }

    pub fn session(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        SessionSnapshot {
            local_node_id: self.inner.node_id.clone(),
            connected: self.inner.transports.iter().any(|t| t.is_connected()),
            running: state.running,
            peers: state.presence.peers().clone(),
            document_ids: state.documents.keys().cloned().collect(),
        }
    }

    /// Subscribe to session events. Closed once the session is disposed.
    pub fn events(&self) -> Subscription<SessionEvent> {
        self.inner.events.subscribe()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl SessionInner {
    fn document(&self, id: &str) -> Option<SharedDocument> {
        self.state.lock().documents.get(id).cloned()
    }

    fn broadcast(&self, message: &TransportMessage) -> usize {
        broadcast_over(&self.transports, message)
    }

    fn handle_message(&self, message: &TransportMessage, via: &Weak<dyn Transport>) {
        if self.state.lock().disposed {
            return;
        }
        match message {
            TransportMessage::Sync { payload } => {
                if *payload.sender() == self.node_id {
                    return;
                }
                self.state.lock().presence.handle_activity(payload.sender());
                self.handle_sync(payload, via);
            }
            TransportMessage::PeerJoin { node_id, .. } => {
                if self.state.lock().presence.handle_join(node_id) {
                    log::debug!("Session {}: peer {node_id} joined", self.node_id);
                    self.events.publish(SessionEvent::PeerJoin {
                        node_id: node_id.clone(),
                    });
                }
            }
            TransportMessage::PeerLeave { node_id, .. } => {
                if self.state.lock().presence.handle_leave(node_id) {
                    log::debug!("Session {}: peer {node_id} left", self.node_id);
                    self.events.publish(SessionEvent::PeerLeave {
                        node_id: node_id.clone(),
                    });
                }
            }
            TransportMessage::Awareness { payload } => {
                if self.state.lock().presence.handle_awareness(payload) {
                    self.events.publish(SessionEvent::AwarenessUpdate {
                        node_id: payload.node_id.clone(),
                        state: payload.state.clone(),
                    });
                }
            }
        }
    }

    fn handle_sync(&self, message: &SyncMessage, via: &Weak<dyn Transport>) {
        let Some(document) = self.document(message.document_id()) else {
            log::debug!(
                "Session {}: ignoring sync traffic for unknown document {}",
                self.node_id,
                message.document_id()
            );
            return;
        };

        match message {
            SyncMessage::Operation {
                document_id,
                operation,
                ..
            } => {
                if operation.origin == self.node_id {
                    return;
                }
                let result = document.lock().apply_remote(operation);
                self.events.publish(SessionEvent::OperationRemote {
                    document_id: document_id.clone(),
                    operation: operation.clone(),
                    result,
                });
            }
            SyncMessage::SyncRequest { document_id, from } => {
                let state = document.lock().state();
                log::debug!(
                    "Session {}: answering sync request from {from} for {document_id} ({} ops)",
                    self.node_id,
                    state.operations.len()
                );
                let response =
                    TransportMessage::sync_response(document_id.clone(), self.node_id.clone(), state.operations, state.vclock);
                // Reply where the request came from; fall back to everyone.
                match via.upgrade() {
                    Some(transport) => {
                        if let Err(e) = transport.send(&response) {
                            log::warn!("Session {}: sync response over {} failed: {e}", self.node_id, transport.name());
                        }
                    }
                    None => {
                        self.broadcast(&response);
                    }
                }
            }
            SyncMessage::SyncResponse {
                document_id,
                from,
                operations,
                ..
            } => {
                let applied = {
                    let mut document = document.lock();
                    operations
                        .iter()
                        .filter(|op| op.origin != self.node_id)
                        .filter(|op| document.apply_remote(op).applied)
                        .count()
                };
                log::debug!("Session {}: sync with {from} for {document_id} applied {applied} ops", self.node_id);
                self.events.publish(SessionEvent::SyncComplete {
                    document_id: document_id.clone(),
                    from: from.clone(),
                    applied,
                });
            }
        }
    }
}

/// Send `message` over every transport, isolating failures. Returns the
/// number of transports that accepted it.
fn broadcast_over(transports: &[Arc<dyn Transport>], message: &TransportMessage) -> usize {
    let mut delivered = 0;
    for transport in transports {
        match transport.send(message) {
            Ok(()) => delivered += 1,
            Err(TransportError::NotConnected) => {
                log::debug!("{} not connected, message dropped", transport.name());
            }
            Err(e) => log::warn!("{} send failed: {e}", transport.name()),
        }
    }
    delivered
}

fn spawn_awareness_timer(inner: &Arc<SessionInner>) -> Option<JoinHandle<()>> {
    let period = inner.awareness_interval;
    if period.is_zero() {
        return None;
    }
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            log::warn!("Session {}: no runtime, awareness re-broadcast disabled", inner.node_id);
            return None;
        }
    };

    let session = Arc::downgrade(inner);
    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; the state was just broadcast.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = session.upgrade() else {
                break;
            };
            let local = inner.state.lock().local_awareness.clone();
            if let Some(awareness) = local {
                inner.broadcast(&TransportMessage::awareness(inner.node_id.clone(), awareness));
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::path;
    use crate::transport::{BroadcastTransport, LocalHub};
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    fn session_on(hub: &LocalHub, node: &str) -> SessionManager {
        SessionManager::new(SessionConfig {
            node_id: Some(NodeId::from(node)),
            transports: vec![Arc::new(BroadcastTransport::new(hub, "session"))],
            ..SessionConfig::default()
        })
    }

    async fn next_event(events: &mut Subscription<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    #[test]
    fn test_random_node_id_when_unset() {
        let a = SessionManager::new(SessionConfig::default());
        let b = SessionManager::new(SessionConfig::default());
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn test_create_document_rejects_duplicates() {
        let session = SessionManager::new(SessionConfig::default());
        session.create_document("doc", Some(json!({"a": 1}))).unwrap();
        assert_eq!(
            session.create_document("doc", None).unwrap_err(),
            SessionError::DuplicateDocument("doc".into())
        );
        assert_eq!(session.document_ids(), vec!["doc".to_string()]);
        assert_eq!(*session.document("doc").unwrap().lock().value(), json!({"a": 1}));
    }

    #[test]
    fn test_remove_document_disposes_it() {
        let session = SessionManager::new(SessionConfig::default());
        let doc = session.create_document("doc", None).unwrap();
        assert!(session.remove_document("doc"));
        assert!(doc.lock().is_disposed());
        assert!(!session.remove_document("doc"));
        assert!(session.document("doc").is_none());
    }

    #[test]
    fn test_set_and_delete_validate_input() {
        let session = SessionManager::new(SessionConfig::default());
        session.create_document("doc", None).unwrap();

        assert_eq!(session.set("doc", &[], json!(1)).unwrap_err(), SessionError::InvalidPath);
        assert_eq!(session.delete("doc", &[]).unwrap_err(), SessionError::InvalidPath);
        assert_eq!(
            session.set("missing", &path(&["a"]), json!(1)).unwrap_err(),
            SessionError::DocumentNotFound("missing".into())
        );

        let op = session.set("doc", &path(&["a"]), json!(1)).unwrap();
        assert_eq!(op.origin, *session.node_id());
        assert!(session.delete("doc", &path(&["b"])).unwrap().is_none());
        assert!(session.delete("doc", &path(&["a"])).unwrap().is_some());
    }

    #[test]
    fn test_disposed_session_rejects_calls() {
        let session = SessionManager::new(SessionConfig::default());
        let doc = session.create_document("doc", None).unwrap();
        let mut events = session.events();

        session.dispose();
        session.dispose();
        assert!(session.is_disposed());
        assert!(doc.lock().is_disposed());
        assert!(session.document_ids().is_empty());
        assert_eq!(session.create_document("x", None).unwrap_err(), SessionError::Disposed);
        assert_eq!(session.start(), Err(SessionError::Disposed));
        assert_eq!(session.request_sync("doc"), Err(SessionError::Disposed));
        assert_eq!(
            session.set_local_awareness(AwarenessState::default()),
            Err(SessionError::Disposed)
        );
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let hub = LocalHub::default();
        let session = session_on(&hub, "a");
        assert!(!session.is_running());

        session.start().unwrap();
        session.start().unwrap();
        assert!(session.is_running());
        assert!(session.session().connected);
        assert_eq!(hub.get_or_create("session").subscriber_count(), 1);

        session.stop();
        session.stop();
        assert!(!session.is_running());
        assert!(!session.session().connected);

        session.start().unwrap();
        assert!(session.session().connected);
    }

    #[tokio::test]
    async fn test_request_sync_needs_document() {
        let hub = LocalHub::default();
        let session = session_on(&hub, "a");
        session.start().unwrap();
        assert_eq!(
            session.request_sync("missing"),
            Err(SessionError::DocumentNotFound("missing".into()))
        );
        session.create_document("doc", None).unwrap();
        assert_eq!(session.request_sync("doc"), Ok(1));
    }

    #[tokio::test]
    async fn test_local_edit_reaches_peer() {
        let hub = LocalHub::default();
        let a = session_on(&hub, "a");
        let b = session_on(&hub, "b");
        let doc_a = a.create_document("shared", Some(json!({"counter": 0}))).unwrap();
        let doc_b = b.create_document("shared", Some(json!({"counter": 0}))).unwrap();
        a.start().unwrap();
        b.start().unwrap();
        let mut events = b.events();

        doc_a.lock().set(&path(&["counter"]), json!(1));

        loop {
            if let SessionEvent::OperationRemote { document_id, result, .. } = next_event(&mut events).await {
                assert_eq!(document_id, "shared");
                assert!(result.applied);
                break;
            }
        }
        assert_eq!(*doc_b.lock().value(), json!({"counter": 1}));
    }

    #[tokio::test]
    async fn test_peer_join_and_leave_events() {
        let hub = LocalHub::default();
        let a = session_on(&hub, "a");
        let b = session_on(&hub, "b");
        a.start().unwrap();
        let mut events = a.events();

        b.start().unwrap();
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::PeerJoin {
                node_id: NodeId::from("b")
            }
        );
        b.stop();
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::PeerLeave {
                node_id: NodeId::from("b")
            }
        );

        let peers = a.peers();
        assert_eq!(peers.len(), 1);
        assert!(!peers[0].online);
    }

    #[tokio::test]
    async fn test_sync_traffic_refreshes_peer_last_seen() {
        let hub = LocalHub::default();
        let a = session_on(&hub, "a");
        let b = session_on(&hub, "b");
        a.create_document("shared", None).unwrap();
        a.start().unwrap();
        let mut events = a.events();
        b.create_document("shared", None).unwrap();
        b.start().unwrap();
        next_event(&mut events).await;
        let joined = a.peers()[0].last_seen;

        tokio::time::sleep(Duration::from_millis(10)).await;
        b.set("shared", &path(&["k"]), json!(1)).unwrap();
        loop {
            if let SessionEvent::OperationRemote { .. } = next_event(&mut events).await {
                break;
            }
        }
        assert!(a.peers()[0].last_seen > joined);
    }

    #[tokio::test]
    async fn test_dispose_forgets_peers() {
        let hub = LocalHub::default();
        let a = session_on(&hub, "a");
        let b = session_on(&hub, "b");
        a.start().unwrap();
        let mut events = a.events();
        b.start().unwrap();
        next_event(&mut events).await;
        assert_eq!(a.peers().len(), 1);

        a.dispose();
        assert!(a.peers().is_empty());
        assert!(a.session().peers.is_empty());
    }

    #[test]
    fn test_event_names() {
        let event = SessionEvent::PeerJoin {
            node_id: NodeId::from("a"),
        };
        assert_eq!(event.name(), "peer:join");
        let event = SessionEvent::SyncComplete {
            document_id: "d".into(),
            from: NodeId::from("a"),
            applied: 0,
        };
        assert_eq!(event.name(), "sync:complete");
    }
}
