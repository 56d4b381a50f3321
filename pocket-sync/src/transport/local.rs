//! In-process broadcast transport.
//!
//! Every transport created on the same [`LocalHub`] and channel name sees the
//! messages of every other one (never its own). Useful for tabs/workers in one
//! process and for tests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{ConnectionState, HandlerRegistry, MessageHandler, Transport, TransportError, Unsubscribe};
use crate::broadcast::{BroadcastGroup, BroadcastHub};
use crate::protocol::TransportMessage;

/// Hub of in-process channels carrying transport messages.
pub type LocalHub = BroadcastHub<TransportMessage>;

/// Message counters for one transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
}

struct Link {
    state: ConnectionState,
    reader: Option<JoinHandle<()>>,
}

/// Transport over a named in-process channel.
pub struct BroadcastTransport {
    name: String,
    channel: String,
    instance_id: Uuid,
    group: Arc<BroadcastGroup<TransportMessage>>,
    handlers: HandlerRegistry,
    link: Mutex<Link>,
    messages_sent: AtomicU64,
    messages_received: Arc<AtomicU64>,
}

impl BroadcastTransport {
    pub fn new(hub: &LocalHub, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        let instance_id = Uuid::new_v4();
        Self {
            name: format!("broadcast:{channel}"),
            group: hub.get_or_create(&channel),
            channel,
            instance_id,
            handlers: HandlerRegistry::new(),
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                reader: None,
            }),
            messages_sent: AtomicU64::new(0),
            messages_received: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

impl Transport for BroadcastTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock();
        if link.state == ConnectionState::Connected {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        // Subscribe before returning so nothing sent after connect() is missed.
        let mut rx = self.group.subscribe();
        let handlers = self.handlers.clone();
        let received = self.messages_received.clone();
        let instance_id = self.instance_id;
        let name = self.name.clone();

        link.reader = Some(runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.origin == instance_id {
                            continue;
                        }
                        received.fetch_add(1, Ordering::Relaxed);
                        handlers.dispatch(&envelope.payload);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("{name} lagged, {skipped} messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        link.state = ConnectionState::Connected;
        log::debug!("{} connected", self.name);
        Ok(())
    }

    fn disconnect(&self) {
        let mut link = self.link.lock();
        if let Some(reader) = link.reader.take() {
            reader.abort();
        }
        if link.state != ConnectionState::Disconnected {
            log::debug!("{} disconnected", self.name);
        }
        link.state = ConnectionState::Disconnected;
    }

    fn send(&self, message: &TransportMessage) -> Result<(), TransportError> {
        if self.link.lock().state != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.group.publish(self.instance_id, message.clone());
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) -> Unsubscribe {
        self.handlers.register(handler)
    }

    fn state(&self) -> ConnectionState {
        self.link.lock().state
    }
}

impl Drop for BroadcastTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.link.lock().reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::NodeId;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    fn collector(transport: &BroadcastTransport) -> (mpsc::UnboundedReceiver<TransportMessage>, Unsubscribe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = transport.on_message(Arc::new(move |msg: &TransportMessage| {
            let _ = tx.send(msg.clone());
        }));
        (rx, handle)
    }

    #[tokio::test]
    async fn test_delivers_to_others_not_self() {
        let hub = LocalHub::default();
        let a = BroadcastTransport::new(&hub, "room");
        let b = BroadcastTransport::new(&hub, "room");
        let (mut rx_a, _ha) = collector(&a);
        let (mut rx_b, _hb) = collector(&b);
        a.connect().unwrap();
        b.connect().unwrap();

        let msg = TransportMessage::peer_join(NodeId::from("a"));
        a.send(&msg).unwrap();

        let got = timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap();
        assert_eq!(got, Some(msg));
        assert!(timeout(Duration::from_millis(50), rx_a.recv()).await.is_err());
        assert_eq!(a.stats().messages_sent, 1);
        assert_eq!(b.stats().messages_received, 1);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let hub = LocalHub::default();
        let a = BroadcastTransport::new(&hub, "one");
        let b = BroadcastTransport::new(&hub, "two");
        let (mut rx_b, _hb) = collector(&b);
        a.connect().unwrap();
        b.connect().unwrap();

        a.send(&TransportMessage::peer_join(NodeId::from("a"))).unwrap();
        assert!(timeout(Duration::from_millis(50), rx_b.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let hub = LocalHub::default();
        let a = BroadcastTransport::new(&hub, "room");
        let msg = TransportMessage::peer_leave(NodeId::from("a"));
        assert_eq!(a.send(&msg), Err(TransportError::NotConnected));
        assert_eq!(a.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_idempotent_and_reconnect() {
        let hub = LocalHub::default();
        let a = BroadcastTransport::new(&hub, "room");
        let b = BroadcastTransport::new(&hub, "room");
        let (mut rx_b, _hb) = collector(&b);

        a.connect().unwrap();
        b.connect().unwrap();
        b.connect().unwrap();
        assert_eq!(hub.get_or_create("room").subscriber_count(), 2);

        b.disconnect();
        assert!(!b.is_connected());
        b.connect().unwrap();
        assert!(b.is_connected());

        let msg = TransportMessage::peer_join(NodeId::from("a"));
        a.send(&msg).unwrap();
        let got = timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap();
        assert_eq!(got, Some(msg));
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_stops_receiving() {
        let hub = LocalHub::default();
        let a = BroadcastTransport::new(&hub, "room");
        let b = BroadcastTransport::new(&hub, "room");
        let (mut rx_b, handle) = collector(&b);
        a.connect().unwrap();
        b.connect().unwrap();

        handle.unsubscribe();
        a.send(&TransportMessage::peer_join(NodeId::from("a"))).unwrap();
        // The handler (and its sender) is gone, so the channel closes.
        let got = timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn test_connect_without_runtime() {
        let hub = LocalHub::default();
        let a = BroadcastTransport::new(&hub, "room");
        assert_eq!(a.connect(), Err(TransportError::NoRuntime));
    }
}
