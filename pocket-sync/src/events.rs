//! Multi-subscriber event stream with a terminal completed state.
//!
//! Each subscriber owns an unbounded queue, so every subscriber sees every
//! event published after it subscribed, in publish order. [`EventStream::complete`]
//! closes all queues exactly once; subscribers drain what is left and then
//! observe `None`.

use parking_lot::Mutex;
use tokio::sync::mpsc;

struct StreamInner<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    completed: bool,
}

/// Publish side of the stream.
pub struct EventStream<T> {
    inner: Mutex<StreamInner<T>>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StreamInner {
                subscribers: Vec::new(),
                completed: false,
            }),
        }
    }

    /// Attach a new subscriber. After completion the subscription is
    /// already closed.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.completed {
            inner.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Deliver `event` to every live subscriber. Returns the number reached.
    pub fn publish(&self, event: T) -> usize {
        let mut inner = self.inner.lock();
        if inner.completed {
            return 0;
        }
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        inner.subscribers.len()
    }

    /// Enter the completed state. Returns `false` if already completed.
    pub fn complete(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.completed {
            return false;
        }
        inner.completed = true;
        inner.subscribers.clear();
        true
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive side handed to one subscriber. Dropping it detaches.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wait for the next event; `None` once the stream completed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next buffered event, if any.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<T> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
