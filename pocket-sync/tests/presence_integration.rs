//! Integration tests for peer tracking and awareness.

use pocket_sync::clock::NodeId;
use pocket_sync::events::Subscription;
use pocket_sync::protocol::AwarenessState;
use pocket_sync::session::{SessionConfig, SessionEvent, SessionManager};
use pocket_sync::transport::{BroadcastTransport, LocalHub};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

fn session_with(hub: &LocalHub, node: &str, config: SessionConfig) -> SessionManager {
    SessionManager::new(SessionConfig {
        node_id: Some(NodeId::from(node)),
        transports: vec![Arc::new(BroadcastTransport::new(hub, "presence"))],
        ..config
    })
}

fn session(hub: &LocalHub, node: &str) -> SessionManager {
    session_with(hub, node, SessionConfig::default())
}

async fn next_awareness(events: &mut Subscription<SessionEvent>, wait: Duration) -> Option<(NodeId, AwarenessState)> {
    timeout(wait, async {
        loop {
            match events.recv().await? {
                SessionEvent::AwarenessUpdate { node_id, state } => return Some((node_id, state)),
                _ => continue,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

#[tokio::test]
async fn test_awareness_broadcast_immediately() {
    let hub = LocalHub::default();
    let a = session(&hub, "A");
    let b = session(&hub, "B");
    a.start().unwrap();
    b.start().unwrap();
    let mut events = b.events();

    let state = AwarenessState::default()
        .with_cursor(json!({"line": 3, "column": 14}))
        .with_user(json!({"name": "Ada"}));
    a.set_local_awareness(state.clone()).unwrap();

    let (node, received) = next_awareness(&mut events, Duration::from_secs(1)).await.unwrap();
    assert_eq!(node, NodeId::from("A"));
    assert_eq!(received, state);

    let stored = b.awareness(&NodeId::from("A")).unwrap();
    assert_eq!(stored.state, state);
    assert!(b.peers().iter().any(|p| p.node_id == NodeId::from("A") && p.online));
}

#[tokio::test]
async fn test_awareness_rebroadcast_reaches_late_joiner() {
    let hub = LocalHub::default();
    let a = session_with(
        &hub,
        "A",
        SessionConfig {
            awareness_interval: Duration::from_millis(50),
            ..SessionConfig::default()
        },
    );
    a.set_local_awareness(AwarenessState::default().with_selection(json!([1, 2])))
        .unwrap();
    a.start().unwrap();

    // B never sees A's peer-join, only the periodic awareness.
    let b = session_with(
        &hub,
        "B",
        SessionConfig {
            announce_presence: false,
            ..SessionConfig::default()
        },
    );
    b.start().unwrap();
    let mut events = b.events();

    let (node, state) = next_awareness(&mut events, Duration::from_secs(1)).await.unwrap();
    assert_eq!(node, NodeId::from("A"));
    assert_eq!(state.selection, Some(json!([1, 2])));

    let snapshot = b.session();
    assert!(snapshot.peers[&NodeId::from("A")].online);
}

#[tokio::test]
async fn test_stop_cancels_awareness_timer() {
    let hub = LocalHub::default();
    let a = session_with(
        &hub,
        "A",
        SessionConfig {
            awareness_interval: Duration::from_millis(30),
            ..SessionConfig::default()
        },
    );
    let b = session(&hub, "B");
    b.start().unwrap();
    a.start().unwrap();
    a.set_local_awareness(AwarenessState::default().with_cursor(json!(0)))
        .unwrap();
    let mut events = b.events();
    assert!(next_awareness(&mut events, Duration::from_secs(1)).await.is_some());

    a.stop();
    // Drain whatever was in flight, then expect silence.
    tokio::time::sleep(Duration::from_millis(50)).await;
    events.drain();
    assert!(next_awareness(&mut events, Duration::from_millis(150)).await.is_none());
}

#[tokio::test]
async fn test_presence_announcement_can_be_disabled() {
    let hub = LocalHub::default();
    let a = session(&hub, "A");
    a.start().unwrap();
    let mut events = a.events();

    let quiet = session_with(
        &hub,
        "Q",
        SessionConfig {
            announce_presence: false,
            ..SessionConfig::default()
        },
    );
    quiet.start().unwrap();

    assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    assert!(a.peers().is_empty());
}

#[tokio::test]
async fn test_snapshot_tracks_join_leave_cycle() {
    let hub = LocalHub::default();
    let a = session(&hub, "A");
    a.create_document("doc", None).unwrap();
    a.start().unwrap();
    let mut events = a.events();

    let b = session(&hub, "B");
    b.start().unwrap();
    let joined = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
    assert_eq!(joined.map(|e| e.name()), Some("peer:join"));

    let snapshot = a.session();
    assert_eq!(snapshot.local_node_id, NodeId::from("A"));
    assert!(snapshot.connected);
    assert!(snapshot.running);
    assert_eq!(snapshot.document_ids, vec!["doc".to_string()]);
    assert!(snapshot.peers[&NodeId::from("B")].online);

    b.dispose();
    let left = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
    assert_eq!(left.map(|e| e.name()), Some("peer:leave"));
    assert!(!a.session().peers[&NodeId::from("B")].online);
}
