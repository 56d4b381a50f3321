//! WebSocket relay server.
//!
//! A dumb fan-out hub for [`WebSocketTransport`](crate::transport::WebSocketTransport)
//! clients. The request path names the room; every text frame received from
//! one connection is forwarded verbatim to every other connection in the same
//! room. The relay never parses or stores document traffic.
//!
//! ```text
//! ws://host/doc-1 ─┐                  ┌─► ws://host/doc-1
//!                  ├─ room "/doc-1" ──┤
//! ws://host/doc-1 ─┘   (broadcast)    └─► ws://host/doc-1
//! ```

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastHub, DEFAULT_CAPACITY};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before it starts lagging
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            channel_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub messages_relayed: u64,
    pub active_rooms: usize,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    messages_relayed: AtomicU64,
}

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<BroadcastHub<String>>,
    counters: Arc<Counters>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let rooms = Arc::new(BroadcastHub::new(config.channel_capacity));
        Self {
            config,
            rooms,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Bind `config.bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        log::info!("Relay listening on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let counters = self.counters.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, rooms, counters).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            messages_relayed: self.counters.messages_relayed.load(Ordering::Relaxed),
            active_rooms: self.rooms.channel_count(),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<BroadcastHub<String>>,
    counters: Arc<Counters>,
) -> Result<(), RelayError> {
    let mut room = String::from("/");
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            room = request.uri().path().to_string();
            Ok(response)
        },
    )
    .await?;

    let connection_id = Uuid::new_v4();
    let group = rooms.get_or_create(&room);
    let mut room_rx = group.subscribe();
    counters.total_connections.fetch_add(1, Ordering::Relaxed);
    counters.active_connections.fetch_add(1, Ordering::Relaxed);
    log::info!("{addr} joined room {room}");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let result = loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    group.publish(connection_id, text.to_string());
                    counters.messages_relayed.fetch_add(1, Ordering::Relaxed);
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Err(e)) => break Err(e.into()),
                Some(Ok(_)) => {}
            },
            relayed = room_rx.recv() => match relayed {
                Ok(envelope) if envelope.origin == connection_id => {}
                Ok(envelope) => {
                    if let Err(e) = ws_sender.send(Message::Text(envelope.payload.clone().into())).await {
                        break Err(e.into());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("{addr} lagged in room {room}, {skipped} frames dropped");
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    drop(room_rx);
    rooms.remove_if_unused(&room);
    counters.active_connections.fetch_sub(1, Ordering::Relaxed);
    log::info!("{addr} left room {room}");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout, Duration};

    async fn start_relay() -> (SocketAddr, Arc<RelayServer>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(RelayServer::with_defaults());
        let running = server.clone();
        tokio::spawn(async move {
            let _ = running.serve(listener).await;
        });
        (addr, server)
    }

    async fn next_text<S>(stream: &mut S) -> String
    where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match timeout(Duration::from_secs(2), stream.next()).await.unwrap() {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.channel_capacity, 256);
    }

    #[tokio::test]
    async fn test_relays_to_same_room_only() {
        let (addr, server) = start_relay().await;
        let (mut a, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/doc-1")).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/doc-1")).await.unwrap();
        let (mut c, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/doc-2")).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        a.send(Message::Text("hello".into())).await.unwrap();
        assert_eq!(next_text(&mut b).await, "hello");

        // Neither the sender nor another room sees it.
        assert!(timeout(Duration::from_millis(100), a.next()).await.is_err());
        assert!(timeout(Duration::from_millis(100), c.next()).await.is_err());

        let stats = server.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.active_rooms, 2);
        assert_eq!(stats.messages_relayed, 1);
    }

    #[tokio::test]
    async fn test_room_removed_after_last_disconnect() {
        let (addr, server) = start_relay().await;
        let (mut a, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/room")).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(server.stats().active_rooms, 1);

        a.close(None).await.unwrap();
        for _ in 0..50 {
            if server.stats().active_connections == 0 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        let stats = server.stats();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.active_rooms, 0);
    }
}
