//! Fan-out of session snapshots to live subscribers.
//!
//! Each subscriber gets its own bounded channel. Delivery uses `try_send`, so a
//! slow or vanished subscriber never holds up the others: a full queue drops
//! that one update for that subscriber, a closed queue removes the subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::snapshot::UpdateMessage;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 16;

/// Identifies a subscriber within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<UpdateMessage>>,
}

impl SubscriberHandle {
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next update. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Arc<UpdateMessage>> {
        self.rx.recv().await
    }

    /// Returns a queued update without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<UpdateMessage>> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<Arc<UpdateMessage>>,
    visible: bool,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Subscribers skipped because they are not visible.
    pub hidden: usize,
    /// Subscribers whose queue was full.
    pub lagging: usize,
    /// Subscribers removed because their receiver was dropped.
    pub closed: usize,
}

/// Registry of live subscribers.
#[derive(Debug)]
pub struct SubscriberHub {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl SubscriberHub {
    /// Creates a hub whose subscribers each buffer up to `capacity` updates.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new, visible subscriber.
    pub fn subscribe(&self) -> SubscriberHandle {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().insert(id, Subscriber { tx, visible: true });
        tracing::debug!(subscriber = id.0, "subscriber added");
        SubscriberHandle { id, rx }
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id.0, "subscriber removed");
        }
        removed
    }

    /// Marks a subscriber visible or hidden. Hidden subscribers stay
    /// registered but receive nothing until shown again.
    pub fn set_visible(&self, id: SubscriberId, visible: bool) -> bool {
        match self.lock().get_mut(&id) {
            Some(subscriber) => {
                subscriber.visible = visible;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Delivers `message` to every visible subscriber.
    pub fn broadcast(&self, message: &Arc<UpdateMessage>) -> Delivery {
        let mut delivery = Delivery::default();
        let mut subscribers = self.lock();

        subscribers.retain(|id, subscriber| {
            if !subscriber.visible {
                delivery.hidden += 1;
                return true;
            }
            match subscriber.tx.try_send(Arc::clone(message)) {
                Ok(()) => {
                    delivery.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = id.0, "subscriber lagging, update skipped");
                    delivery.lagging += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber = id.0, "subscriber gone");
                    delivery.closed += 1;
                    false
                }
            }
        });

        delivery
    }
}
