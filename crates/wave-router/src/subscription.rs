//! Subscription management
//!
//! Every subscription owns a bounded queue. The router keeps the sending
//! half under the subscription's channel; the subscriber keeps the
//! [`Subscription`] handle with the receiving half.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, info};
use wave_core::Message;

/// Default number of undelivered messages a subscription can hold
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Opaque token identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Subscriber side of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    channel_id: String,
    rx: mpsc::Receiver<Arc<Message>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the subscription has been removed and every
    /// buffered message has been consumed.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.rx.recv().await
    }

    /// Take the next buffered message without waiting
    pub fn try_recv(&mut self) -> Result<Arc<Message>, TryRecvError> {
        self.rx.try_recv()
    }

    /// Stop accepting deliveries.
    ///
    /// Buffered messages stay readable; the router prunes the subscription
    /// on its next cleanup pass. Dropping the handle has the same effect.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Outcome of offering one message to one listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    Full,
    Closed,
}

/// Router side of a subscription
#[derive(Debug)]
struct Listener {
    id: SubscriptionId,
    tx: mpsc::Sender<Arc<Message>>,
}

impl Listener {
    fn offer(&self, message: &Arc<Message>) -> Delivery {
        match self.tx.try_send(Arc::clone(message)) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// The subscriber dropped or closed its handle
    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Per-broadcast delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Listeners that received the message
    pub delivered: usize,
    /// Listeners skipped because their queue was full
    pub dropped: usize,
    /// Listeners whose subscriber has gone away
    pub closed: usize,
}

/// Manages all subscriptions, keyed by channel
pub struct SubscriptionManager {
    /// Channel -> listeners; a channel key exists only while non-empty
    channels: RwLock<HashMap<String, Vec<Listener>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a manager whose queues hold `capacity` messages (at least 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new subscription under `channel_id`
    pub fn subscribe(&self, channel_id: &str) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        self.channels
            .write()
            .entry(channel_id.to_string())
            .or_default()
            .push(Listener { id, tx });

        info!(channel = channel_id, subscription = %id, "Listener subscribed");

        Subscription {
            id,
            channel_id: channel_id.to_string(),
            rx,
        }
    }

    /// Remove one subscription, closing its queue.
    ///
    /// Returns `false` when the channel or subscription is unknown.
    pub fn unsubscribe(&self, channel_id: &str, id: SubscriptionId) -> bool {
        let mut channels = self.channels.write();

        let Some(listeners) = channels.get_mut(channel_id) else {
            info!(channel = channel_id, subscription = %id, "Unsubscribe from unknown channel");
            return false;
        };

        let Some(pos) = listeners.iter().position(|l| l.id == id) else {
            info!(channel = channel_id, subscription = %id, "Listener not found in channel");
            return false;
        };

        // Dropping the sender closes the queue once it is drained
        listeners.swap_remove(pos);
        if listeners.is_empty() {
            channels.remove(channel_id);
        }

        info!(channel = channel_id, subscription = %id, "Listener unsubscribed");
        true
    }

    /// Offer a message to every listener of its channel without blocking
    pub fn broadcast(&self, message: Arc<Message>) -> BroadcastReport {
        let channels = self.channels.read();
        let mut report = BroadcastReport::default();

        let Some(listeners) = channels.get(&message.channel_id) else {
            return report;
        };

        for listener in listeners {
            match listener.offer(&message) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Full => {
                    report.dropped += 1;
                    debug!(
                        channel = %message.channel_id,
                        subscription = %listener.id,
                        "Listener buffer full, skipping message"
                    );
                }
                Delivery::Closed => report.closed += 1,
            }
        }

        report
    }

    /// Remove listeners whose subscriber has gone away, then empty channels.
    ///
    /// Only the queue's closed flag is inspected; pending messages are never
    /// consumed. Returns the number of listeners removed.
    pub fn cleanup(&self) -> usize {
        let mut channels = self.channels.write();
        let mut removed = 0;

        channels.retain(|channel_id, listeners| {
            let before = listeners.len();
            listeners.retain(|l| !l.is_closed());
            let pruned = before - listeners.len();
            if pruned > 0 {
                removed += pruned;
                info!(channel = %channel_id, pruned, "Removed stale listeners");
            }
            if listeners.is_empty() {
                info!(channel = %channel_id, "Removed empty channel");
                false
            } else {
                true
            }
        });

        removed
    }

    /// Number of subscriptions on one channel
    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.channels
            .read()
            .get(channel_id)
            .map_or(0, |listeners| listeners.len())
    }

    /// Whether `id` is currently registered under `channel_id`
    pub fn contains(&self, channel_id: &str, id: SubscriptionId) -> bool {
        self.channels
            .read()
            .get(channel_id)
            .is_some_and(|listeners| listeners.iter().any(|l| l.id == id))
    }

    /// Number of channels with at least one subscription
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Names of all channels with at least one subscription
    pub fn channels(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// Total subscription count
    pub fn len(&self) -> usize {
        self.channels.read().values().map(Vec::len).sum()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wave_core::Value;

    fn message(channel: &str, n: i64) -> Arc<Message> {
        Arc::new(Message {
            channel_id: channel.to_string(),
            sender_id: "tester".to_string(),
            payload: Value::Int(n),
            is_persistent: false,
        })
    }

    #[test]
    fn test_ids_are_unique() {
        let manager = SubscriptionManager::new();
        let a = manager.subscribe("chat");
        let b = manager.subscribe("chat");
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.subscriber_count("chat"), 2);
    }

    #[test]
    fn test_unsubscribe_removes_empty_channel() {
        let manager = SubscriptionManager::new();
        let sub = manager.subscribe("chat");

        assert!(manager.unsubscribe("chat", sub.id()));
        assert_eq!(manager.channel_count(), 0);
        assert!(!manager.unsubscribe("chat", sub.id()));
        assert!(!manager.unsubscribe("other", sub.id()));
    }

    #[test]
    fn test_unsubscribe_wrong_channel_keeps_subscription() {
        let manager = SubscriptionManager::new();
        let sub = manager.subscribe("chat");
        let _other = manager.subscribe("news");

        assert!(!manager.unsubscribe("news", sub.id()));
        assert!(manager.contains("chat", sub.id()));
    }

    #[test]
    fn test_full_queue_drops() {
        let manager = SubscriptionManager::with_capacity(2);
        let mut sub = manager.subscribe("chat");

        for n in 0..3 {
            manager.broadcast(message("chat", n));
        }
        let report = manager.broadcast(message("chat", 3));
        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 0);

        assert_eq!(sub.try_recv().unwrap().payload, Value::Int(0));
        assert_eq!(sub.try_recv().unwrap().payload, Value::Int(1));
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_cleanup_keeps_pending_messages() {
        let manager = SubscriptionManager::new();
        let mut busy = manager.subscribe("chat");
        let idle = manager.subscribe("chat");

        manager.broadcast(message("chat", 1));
        drop(idle);

        assert_eq!(manager.cleanup(), 1);
        assert_eq!(manager.subscriber_count("chat"), 1);
        assert_eq!(busy.try_recv().unwrap().payload, Value::Int(1));
    }

    #[test]
    fn test_cleanup_after_close() {
        let manager = SubscriptionManager::new();
        let mut sub = manager.subscribe("chat");
        manager.broadcast(message("chat", 1));
        sub.close();

        assert_eq!(manager.cleanup(), 1);
        assert!(manager.is_empty());
        assert_eq!(sub.try_recv().unwrap().payload, Value::Int(1));
    }
}
