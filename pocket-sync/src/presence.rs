//! Peer table and ephemeral awareness state.
//!
//! Tracks every remote node the session has heard from. Peers are created on
//! their first `peer-join` or awareness message (a node that joined before we
//! connected only shows up through its periodic awareness broadcast), marked
//! offline on `peer-leave`, and never removed until the session is disposed.
//! Any later message from a known peer refreshes its `last_seen`. Awareness is last-message-wins
//! per node; nothing here is merged or persisted.
//!
//! Messages carrying the local node id are ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clock::{now_millis, NodeId};
use crate::protocol::{AwarenessState, AwarenessUpdate};

/// What the session knows about one remote node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub node_id: NodeId,
    pub online: bool,
    /// Local wall-clock time (ms) of the last message from this node.
    pub last_seen: u64,
}

/// Latest awareness state received from a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAwareness {
    pub state: AwarenessState,
    pub last_updated: u64,
}

/// Presence bookkeeping for one session.
#[derive(Debug)]
pub struct PresenceTable {
    local_node: NodeId,
    peers: BTreeMap<NodeId, PeerInfo>,
    awareness: BTreeMap<NodeId, RemoteAwareness>,
}

impl PresenceTable {
    pub fn new(local_node: NodeId) -> Self {
        Self {
            local_node,
            peers: BTreeMap::new(),
            awareness: BTreeMap::new(),
        }
    }

    /// Record a `peer-join`. Returns `false` for our own announcement.
    pub fn handle_join(&mut self, node_id: &NodeId) -> bool {
        if *node_id == self.local_node {
            return false;
        }
        self.touch(node_id).online = true;
        true
    }

    /// Record a `peer-leave`: the peer stays in the table, offline.
    pub fn handle_leave(&mut self, node_id: &NodeId) -> bool {
        if *node_id == self.local_node {
            return false;
        }
        self.touch(node_id).online = false;
        true
    }

    /// Record an awareness update, creating the peer if it is new.
    pub fn handle_awareness(&mut self, update: &AwarenessUpdate) -> bool {
        if update.node_id == self.local_node {
            return false;
        }
        self.touch(&update.node_id).online = true;
        self.awareness.insert(
            update.node_id.clone(),
            RemoteAwareness {
                state: update.state.clone(),
                last_updated: update.timestamp,
            },
        );
        true
    }

    /// Refresh `last_seen` for any other message from a known peer.
    /// Unknown nodes are not added.
    pub fn handle_activity(&mut self, node_id: &NodeId) -> bool {
        match self.peers.get_mut(node_id) {
            Some(peer) => {
                peer.last_seen = now_millis();
                true
            }
            None => false,
        }
    }

    fn touch(&mut self, node_id: &NodeId) -> &mut PeerInfo {
        let now = now_millis();
        let peer = self.peers.entry(node_id.clone()).or_insert_with(|| PeerInfo {
            node_id: node_id.clone(),
            online: false,
            last_seen: now,
        });
        peer.last_seen = now;
        peer
    }

    pub fn peer(&self, node_id: &NodeId) -> Option<&PeerInfo> {
        self.peers.get(node_id)
    }

    pub fn peers(&self) -> &BTreeMap<NodeId, PeerInfo> {
        &self.peers
    }

    pub fn awareness(&self, node_id: &NodeId) -> Option<&RemoteAwareness> {
        self.awareness.get(node_id)
    }

    pub fn online_count(&self) -> usize {
        self.peers.values().filter(|p| p.online).count()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.awareness.clear();
    }
}
