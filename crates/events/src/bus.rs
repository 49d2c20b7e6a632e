//! Broker abstraction (mechanics only).
//!
//! The bus is the **transport seam** between services. It makes minimal
//! assumptions:
//!
//! - **Topic-addressed**: one named channel per fact kind (`products`, `orders`).
//! - **At-least-once delivery**: a message may be delivered more than once;
//!   consumers must be idempotent.
//! - **Explicit acknowledgement**: a delivery that is neither acknowledged nor
//!   rejected stays pending; `reject` asks for redelivery.
//! - **No persistence guarantees of its own**: durability is up to the
//!   implementation (Redis Streams is durable, the in-memory bus is not).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::Delivery;

/// A subscription to a topic.
///
/// ## Usage Pattern
///
/// ```ignore
/// let sub = bus.subscribe("orders", "inventory");
///
/// loop {
///     match sub.recv_timeout(Duration::from_millis(250)) {
///         Ok(delivery) => handle(delivery),
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,  // Bus closed
///     }
/// }
/// ```
///
/// Subscriptions are designed for single-threaded consumption.
///
/// Dropping the subscription closes it. Producers that feed it from a
/// background reader hold a [`SubscriptionHandle`] and stop once it reports
/// closed, instead of waiting for their next send to fail.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
    closed: Arc<AtomicBool>,
}

/// Producer-side view of whether a [`Subscription`] is still held.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    closed: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self {
            receiver,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            closed: self.closed.clone(),
        }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Topic-addressed pub/sub with acknowledgement.
///
/// ```text
/// local commit → OutboundPublisher → publish(topic) ─┐
///                                                    ▼
///                      subscribe(topic, group) → Delivery → EventConsumer
///                                                    │
///                              acknowledge / reject ◄┘
/// ```
///
/// `publish()` can fail (broker unavailable, serialization). Callers treat
/// such failures as transient.
///
/// The trait requires `Send + Sync`: publishers and consumer workers share one
/// bus across threads.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error>;

    /// Subscribe `group` to `topic`.
    fn subscribe(&self, topic: &str, group: &str) -> Subscription<Delivery<M>>;

    /// Mark a delivery as processed; it will not be redelivered.
    fn acknowledge(&self, delivery: &Delivery<M>) -> Result<(), Self::Error>;

    /// Give a delivery back for redelivery.
    fn reject(&self, delivery: Delivery<M>) -> Result<(), Self::Error>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, topic: &str, message: M) -> Result<(), Self::Error> {
        (**self).publish(topic, message)
    }

    fn subscribe(&self, topic: &str, group: &str) -> Subscription<Delivery<M>> {
        (**self).subscribe(topic, group)
    }

    fn acknowledge(&self, delivery: &Delivery<M>) -> Result<(), Self::Error> {
        (**self).acknowledge(delivery)
    }

    fn reject(&self, delivery: Delivery<M>) -> Result<(), Self::Error> {
        (**self).reject(delivery)
    }
}
