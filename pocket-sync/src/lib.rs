//! # pocket-sync: Conflict-free replication core
//!
//! Lets independent replicas mutate a shared JSON document concurrently and
//! converge once they have exchanged the same operations, in any order.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐
//! │ SyncBridge       │   │ SessionManager   │
//! │ (collections,    │   │ (documents,      │
//! │  GC, pending)    │   │  peers, sync)    │
//! └────────┬─────────┘   └───┬──────────┬───┘
//!          │                 │          │
//!          ▼                 ▼          ▼
//! ┌──────────────────────────────┐ ┌──────────────────────┐
//! │ CrdtDocument                 │ │ Transport            │
//! │ LWW per path, vector clock,  │ │ ├─ BroadcastTransport │
//! │ append-only oplog            │ │ └─ WebSocketTransport │
//! └──────────────────────────────┘ └──────────┬───────────┘
//!                                             ▼
//!                                      ┌─────────────┐
//!                                      │ RelayServer │
//!                                      └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`clock`]: node ids, operation timestamps, vector clocks
//! - [`operation`]: CRDT operations and JSON path helpers
//! - [`document`]: the CRDT document and its merge algorithm
//! - [`bridge`]: collection writes to operations, pending queue, GC
//! - [`events`]: multi-subscriber event streams
//! - [`protocol`]: transport message union and its JSON text codec
//! - [`broadcast`]: named in-process fan-out channels
//! - [`transport`]: transport contract, in-process and WebSocket transports
//! - [`relay`]: WebSocket relay server
//! - [`presence`]: peer table and awareness
//! - [`session`]: collaborative session manager

pub mod bridge;
pub mod broadcast;
pub mod clock;
pub mod document;
pub mod events;
pub mod operation;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use bridge::{BridgeError, BridgeStats, GcReport, SyncBridge, SyncBridgeConfig, SyncOperation};
pub use broadcast::{BroadcastGroup, BroadcastHub, BroadcastStats};
pub use clock::{NodeId, OperationTimestamp, SeenSet, VectorClock};
pub use document::{CrdtDocument, DocumentState, MergeResult, SharedDocument};
pub use events::{EventStream, Subscription};
pub use operation::{CrdtOperation, OperationKind};
pub use presence::{PeerInfo, PresenceTable, RemoteAwareness};
pub use protocol::{AwarenessState, AwarenessUpdate, ProtocolError, SyncMessage, TransportMessage};
pub use relay::{RelayConfig, RelayError, RelayServer, RelayStats};
pub use session::{SessionConfig, SessionError, SessionEvent, SessionManager, SessionSnapshot};
pub use transport::{
    BroadcastTransport, ConnectionState, LocalHub, MessageHandler, Transport, TransportError,
    Unsubscribe, WebSocketTransport,
};
