//! WebSocket transport.
//!
//! Messages travel as JSON text frames. The connection is established on a
//! background task; until the handshake completes the transport reports
//! [`ConnectionState::Connecting`] and `send` fails with
//! [`TransportError::NotConnected`]. Frames that do not parse as a
//! [`TransportMessage`] are dropped.
//!
//! ```text
//!  send() ──► outgoing mpsc ──► writer ──► WebSocket ──► relay ──► peers
//!  handlers ◄── decode ◄────── reader ◄── WebSocket ◄──┘
//! ```

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::{ConnectionState, HandlerRegistry, MessageHandler, Transport, TransportError, Unsubscribe};
use crate::protocol::TransportMessage;

struct Link {
    state: ConnectionState,
    /// Bumped on every connect/disconnect so a stale task never touches
    /// the state of a newer connection.
    generation: u64,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

/// Transport over a single WebSocket connection.
pub struct WebSocketTransport {
    name: String,
    url: String,
    handlers: HandlerRegistry,
    link: Arc<Mutex<Link>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: format!("websocket:{url}"),
            url,
            handlers: HandlerRegistry::new(),
            link: Arc::new(Mutex::new(Link {
                state: ConnectionState::Disconnected,
                generation: 0,
                outgoing: None,
                task: None,
            })),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock();
        if link.state != ConnectionState::Disconnected {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        link.generation += 1;
        link.state = ConnectionState::Connecting;
        let connection = Connection {
            url: self.url.clone(),
            name: self.name.clone(),
            generation: link.generation,
            link: self.link.clone(),
            handlers: self.handlers.clone(),
        };
        link.task = Some(runtime.spawn(connection.run()));
        Ok(())
    }

    fn disconnect(&self) {
        let mut link = self.link.lock();
        link.generation += 1;
        // Dropping the sender ends the writer loop, which closes the socket.
        link.outgoing = None;
        if let Some(task) = link.task.take() {
            if link.state == ConnectionState::Connecting {
                task.abort();
            }
        }
        if link.state != ConnectionState::Disconnected {
            log::debug!("{} disconnected", self.name);
        }
        link.state = ConnectionState::Disconnected;
    }

    fn send(&self, message: &TransportMessage) -> Result<(), TransportError> {
        let link = self.link.lock();
        match (&link.state, &link.outgoing) {
            (ConnectionState::Connected, Some(tx)) => {
                let text = message.encode()?;
                tx.send(text).map_err(|_| TransportError::ChannelClosed)
            }
            _ => Err(TransportError::NotConnected),
        }
    }

    fn on_message(&self, handler: MessageHandler) -> Unsubscribe {
        self.handlers.register(handler)
    }

    fn state(&self) -> ConnectionState {
        self.link.lock().state
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// One connection attempt and, if it succeeds, its read/write loop.
struct Connection {
    url: String,
    name: String,
    generation: u64,
    link: Arc<Mutex<Link>>,
    handlers: HandlerRegistry,
}

impl Connection {
    async fn run(self) {
        let ws_stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("{} failed to connect: {e}", self.name);
                self.finish();
                return;
            }
        };

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        {
            let mut link = self.link.lock();
            if link.generation != self.generation {
                return;
            }
            link.state = ConnectionState::Connected;
            link.outgoing = Some(out_tx);
        }
        log::info!("{} connected", self.name);

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => match outgoing {
                    Some(text) => {
                        if ws_writer.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                incoming = ws_reader.next() => match incoming {
                    Some(Ok(Message::Text(text))) => match TransportMessage::decode(text.as_str()) {
                        Ok(message) => self.handlers.dispatch(&message),
                        Err(e) => log::debug!("{} dropping malformed frame: {e}", self.name),
                    },
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        let _ = ws_writer.close().await;
        self.finish();
    }

    fn finish(&self) {
        let mut link = self.link.lock();
        if link.generation == self.generation {
            link.state = ConnectionState::Disconnected;
            link.outgoing = None;
            link.task = None;
            log::info!("{} connection closed", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::NodeId;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_initial_state() {
        let t = WebSocketTransport::new("ws://127.0.0.1:9090/doc");
        assert_eq!(t.url(), "ws://127.0.0.1:9090/doc");
        assert_eq!(t.state(), ConnectionState::Disconnected);
        assert_eq!(t.connect(), Err(TransportError::NoRuntime));
    }

    #[tokio::test]
    async fn test_send_before_connected_reports_not_connected() {
        let t = WebSocketTransport::new("ws://127.0.0.1:9/unreachable");
        let msg = TransportMessage::peer_join(NodeId::from("a"));
        assert_eq!(t.send(&msg), Err(TransportError::NotConnected));

        t.connect().unwrap();
        // Still handshaking (or already failed): never connected.
        assert_ne!(t.state(), ConnectionState::Connected);
        assert_eq!(t.send(&msg), Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_failed_connect_returns_to_disconnected() {
        let t = WebSocketTransport::new("ws://127.0.0.1:9/unreachable");
        t.connect().unwrap();
        for _ in 0..50 {
            if t.state() == ConnectionState::Disconnected {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(t.state(), ConnectionState::Disconnected);
    }
}
