//! Named fan-out channels.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each subscriber gets an independent receiver that buffers up to
//! `capacity` messages; a subscriber that falls further behind loses the
//! oldest messages (lag) instead of slowing the sender down.
//!
//! Every message is wrapped in an [`Envelope`] naming the endpoint that sent
//! it, so receivers can skip their own traffic. Filtering is the
//! receiver's job.
//!
//! Used by the in-process transport (payload = [`TransportMessage`]) and by
//! the relay server (payload = raw text frames).
//!
//! [`TransportMessage`]: crate::protocol::TransportMessage

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default number of messages buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// A message tagged with the endpoint that sent it.
#[derive(Debug)]
pub struct Envelope<T> {
    pub origin: Uuid,
    pub payload: T,
}

/// Statistics for monitoring channel health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub subscribers: usize,
}

/// One named channel.
pub struct BroadcastGroup<T> {
    sender: broadcast::Sender<Arc<Envelope<T>>>,
    capacity: usize,
    messages_sent: AtomicU64,
}

impl<T: Send + Sync + 'static> BroadcastGroup<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Send `payload` to every subscriber, including the sender's own
    /// receiver. Returns the number of receivers reached.
    pub fn publish(&self, origin: Uuid, payload: T) -> usize {
        let count = self
            .sender
            .send(Arc::new(Envelope { origin, payload }))
            .unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope<T>>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }
}

/// Registry of named channels.
///
/// Owned by whoever wires endpoints together (a test, a host process, the
/// relay server); endpoints sharing a hub and a name see each other's
/// messages. Separate hubs are fully isolated.
pub struct BroadcastHub<T> {
    channels: Mutex<HashMap<String, Arc<BroadcastGroup<T>>>>,
    default_capacity: usize,
}

impl<T: Send + Sync + 'static> BroadcastHub<T> {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the channel called `name`.
    pub fn get_or_create(&self, name: &str) -> Arc<BroadcastGroup<T>> {
        self.channels
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    /// Drop a channel nobody is subscribed to.
    pub fn remove_if_unused(&self, name: &str) -> bool {
        let mut channels = self.channels.lock();
        match channels.get(name) {
            Some(group) if group.subscriber_count() == 0 => {
                channels.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.lock().keys().cloned().collect()
    }
}

impl<T: Send + Sync + 'static> Default for BroadcastHub<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
