//! In-memory event bus for tests/dev.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, mpsc};

use crate::bus::{EventBus, Subscription};
use crate::Delivery;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("in-memory bus lock poisoned")]
    Poisoned,
    /// The subscription a delivery came from has gone away.
    #[error("subscriber {0} is gone")]
    SubscriberGone(String),
}

#[derive(Debug)]
struct Subscriber<M> {
    id: u64,
    topic: String,
    group: String,
    tx: mpsc::Sender<Delivery<M>>,
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Fan-out: every subscription on a topic receives a copy
/// - `reject` redelivers to the same subscription with `attempt + 1`
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
    next_subscriber: AtomicU64,
    next_tag: AtomicU64,
    acknowledged: AtomicU64,
    rejected: AtomicU64,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of deliveries acknowledged so far.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// Number of deliveries handed back for redelivery so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            next_tag: AtomicU64::new(1),
            acknowledged: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }
}

fn subscriber_name(group: &str, id: u64) -> String {
    format!("{group}#{id}")
}

fn subscriber_id(name: &str) -> Option<u64> {
    name.rsplit_once('#').and_then(|(_, id)| id.parse().ok())
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst).to_string();

        // Drop any dead subscribers while publishing.
        subs.retain(|s| {
            if s.topic != topic {
                return true;
            }
            let delivery = Delivery::new(
                topic,
                subscriber_name(&s.group, s.id),
                tag.clone(),
                1,
                message.clone(),
            );
            s.tx.send(delivery).is_ok()
        });

        Ok(())
    }

    fn subscribe(&self, topic: &str, group: &str) -> Subscription<Delivery<M>> {
        let (tx, rx) = mpsc::channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(topic, group, subscriber = id, "in-memory subscription created");

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber {
                id,
                topic: topic.to_string(),
                group: group.to_string(),
                tx,
            });
        }

        Subscription::new(rx)
    }

    fn acknowledge(&self, _delivery: &Delivery<M>) -> Result<(), Self::Error> {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reject(&self, delivery: Delivery<M>) -> Result<(), Self::Error> {
        self.rejected.fetch_add(1, Ordering::SeqCst);

        let subs = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let name = delivery.subscriber().to_string();
        let target = subscriber_id(&name)
            .and_then(|id| subs.iter().find(|s| s.id == id))
            .ok_or_else(|| InMemoryBusError::SubscriberGone(name.clone()))?;

        target
            .tx
            .send(delivery.redelivered())
            .map_err(|_| InMemoryBusError::SubscriberGone(name))
    }
}
