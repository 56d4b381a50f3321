//! Pluggable message transports.
//!
//! A transport moves [`TransportMessage`]s between the endpoints sharing one
//! channel or address. Delivery is best-effort and fire-and-forget; inbound
//! messages are handed to every registered handler on the transport's own
//! reader task.
//!
//! - [`local`]: in-process fan-out over a [`BroadcastHub`](crate::broadcast::BroadcastHub)
//! - [`websocket`]: JSON text frames over a WebSocket connection

pub mod local;
pub mod websocket;

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::protocol::{ProtocolError, TransportMessage};

pub use local::{BroadcastTransport, LocalHub};
pub use websocket::WebSocketTransport;

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,
    #[error("No tokio runtime available to drive the transport")]
    NoRuntime,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Transport channel closed")]
    ChannelClosed,
}

/// Callback for inbound messages.
pub type MessageHandler = Arc<dyn Fn(&TransportMessage) + Send + Sync>;

/// Minimal send/receive contract shared by every transport.
pub trait Transport: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Open the connection. A no-op while connecting or connected.
    fn connect(&self) -> Result<(), TransportError>;

    /// Close the connection. A later `connect` opens a fresh one.
    fn disconnect(&self);

    /// Deliver `message` to every other endpoint. Fails with
    /// [`TransportError::NotConnected`] instead of blocking.
    fn send(&self, message: &TransportMessage) -> Result<(), TransportError>;

    /// Register an inbound message handler.
    fn on_message(&self, handler: MessageHandler) -> Unsubscribe;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    handlers: Vec<(u64, MessageHandler)>,
}

/// Handler list shared between a transport and its reader task.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: MessageHandler) -> Unsubscribe {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.handlers.push((id, handler));
        Unsubscribe {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Invoke every handler. The list is snapshotted first so handlers may
    /// register or unsubscribe while running.
    pub fn dispatch(&self, message: &TransportMessage) {
        let handlers: Vec<MessageHandler> = self
            .inner
            .lock()
            .handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(message);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deregistration handle returned by [`Transport::on_message`].
#[derive(Debug)]
pub struct Unsubscribe {
    registry: Weak<Mutex<RegistryInner>>,
    id: u64,
}

impl Unsubscribe {
    /// Remove the handler. Safe after the transport is gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().handlers.retain(|(id, _)| *id != self.id);
        }
    }
}
