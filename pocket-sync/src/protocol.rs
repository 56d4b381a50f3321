//! Transport message protocol.
//!
//! Wire format (JSON text, one message per frame):
//! ```text
//! { "kind": "sync",       "payload": { "type": "operation" | "sync-request" | "sync-response", … } }
//! { "kind": "peer-join",  "nodeId": "…", "timestamp": 1700000000000 }
//! { "kind": "peer-leave", "nodeId": "…", "timestamp": 1700000000000 }
//! { "kind": "awareness",  "payload": { "nodeId": "…", "state": { … }, "timestamp": … } }
//! ```
//!
//! Both unions are closed: every consumer matches them exhaustively.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{now_millis, NodeId, VectorClock};
use crate::operation::CrdtOperation;

/// Document sync traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SyncMessage {
    /// A single locally generated operation
    Operation {
        document_id: String,
        from: NodeId,
        operation: CrdtOperation,
    },
    /// Ask any peer holding the document for its oplog
    SyncRequest { document_id: String, from: NodeId },
    /// Full oplog of the responder
    SyncResponse {
        document_id: String,
        from: NodeId,
        operations: Vec<CrdtOperation>,
        #[serde(default)]
        vclock: VectorClock,
    },
}

impl SyncMessage {
    pub fn document_id(&self) -> &str {
        match self {
            SyncMessage::Operation { document_id, .. }
            | SyncMessage::SyncRequest { document_id, .. }
            | SyncMessage::SyncResponse { document_id, .. } => document_id,
        }
    }

    pub fn sender(&self) -> &NodeId {
        match self {
            SyncMessage::Operation { from, .. }
            | SyncMessage::SyncRequest { from, .. }
            | SyncMessage::SyncResponse { from, .. } => from,
        }
    }
}

/// Ephemeral per-peer presence payload. Never merged: the latest update
/// replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessState {
    /// Cursor position, in whatever coordinates the host uses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Value>,
    /// Current selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Value>,
    /// User metadata (name, color, …)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl AwarenessState {
    pub fn with_cursor(mut self, cursor: Value) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_selection(mut self, selection: Value) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }
}

/// Awareness broadcast from one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwarenessUpdate {
    pub node_id: NodeId,
    pub state: AwarenessState,
    pub timestamp: u64,
}

/// Top-level message carried by every transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum TransportMessage {
    Sync { payload: SyncMessage },
    PeerJoin { node_id: NodeId, timestamp: u64 },
    PeerLeave { node_id: NodeId, timestamp: u64 },
    Awareness { payload: AwarenessUpdate },
}

impl TransportMessage {
    pub fn operation(document_id: impl Into<String>, from: NodeId, operation: CrdtOperation) -> Self {
        TransportMessage::Sync {
            payload: SyncMessage::Operation {
                document_id: document_id.into(),
                from,
                operation,
            },
        }
    }

    pub fn sync_request(document_id: impl Into<String>, from: NodeId) -> Self {
        TransportMessage::Sync {
            payload: SyncMessage::SyncRequest {
                document_id: document_id.into(),
                from,
            },
        }
    }

    pub fn sync_response(
        document_id: impl Into<String>,
        from: NodeId,
        operations: Vec<CrdtOperation>,
        vclock: VectorClock,
    ) -> Self {
        TransportMessage::Sync {
            payload: SyncMessage::SyncResponse {
                document_id: document_id.into(),
                from,
                operations,
                vclock,
            },
        }
    }

    pub fn peer_join(node_id: NodeId) -> Self {
        TransportMessage::PeerJoin {
            node_id,
            timestamp: now_millis(),
        }
    }

    pub fn peer_leave(node_id: NodeId) -> Self {
        TransportMessage::PeerLeave {
            node_id,
            timestamp: now_millis(),
        }
    }

    pub fn awareness(node_id: NodeId, state: AwarenessState) -> Self {
        TransportMessage::Awareness {
            payload: AwarenessUpdate {
                node_id,
                state,
                timestamp: now_millis(),
            },
        }
    }

    /// Node that produced this message.
    pub fn sender(&self) -> &NodeId {
        match self {
            TransportMessage::Sync { payload } => payload.sender(),
            TransportMessage::PeerJoin { node_id, .. } | TransportMessage::PeerLeave { node_id, .. } => {
                node_id
            }
            TransportMessage::Awareness { payload } => &payload.node_id,
        }
    }

    /// Serialize to the JSON text wire format.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse from the JSON text wire format.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}
