//! Announcing local events to partner services.
//!
//! Publishing happens strictly after the local state change has been
//! committed, so a partner never hears about something this service then
//! failed to store. The price is at-least-once: a send that times out may
//! still reach the broker, and callers that retry may publish twice.
//! Partners deduplicate by fact identity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use meshsync_events::{Announce, CodecError, Event, EventBus, FactIdentity, FactKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("broker did not accept the message within {0:?}")]
    Timeout(Duration),

    #[error("broker error: {0}")]
    Bus(String),

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("no topic configured for {0}")]
    UnknownRoute(FactKind),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Timeout(_) | PublishError::Bus(_))
    }
}

pub struct OutboundPublisher<B> {
    bus: Arc<B>,
    routes: HashMap<FactKind, String>,
    timeout: Duration,
}

impl<B> OutboundPublisher<B>
where
    B: EventBus<String> + 'static,
{
    /// Routes every fact kind to its default topic.
    pub fn new(bus: Arc<B>, timeout: Duration) -> Self {
        let routes = [FactKind::ProductAdded, FactKind::OrderCompleted]
            .into_iter()
            .map(|kind| (kind, kind.default_topic().to_string()))
            .collect();
        Self {
            bus,
            routes,
            timeout,
        }
    }

    pub fn with_route(mut self, kind: FactKind, topic: impl Into<String>) -> Self {
        self.routes.insert(kind, topic.into());
        self
    }

    pub fn without_route(mut self, kind: FactKind) -> Self {
        self.routes.remove(&kind);
        self
    }

    /// Announce `event` if it is something partners need to hear about.
    ///
    /// Returns the identity of the announced fact, or `None` when the event
    /// stays local.
    pub async fn publish<E>(&self, event: &E) -> Result<Option<FactIdentity>, PublishError>
    where
        E: Announce + Event,
    {
        let Some(fact) = event.announce() else {
            debug!(event_type = event.event_type(), "event stays local");
            return Ok(None);
        };

        let kind = fact.kind();
        let identity = fact.identity();
        let topic = self
            .routes
            .get(&kind)
            .cloned()
            .ok_or(PublishError::UnknownRoute(kind))?;
        let payload = fact.encode()?;

        let bus = self.bus.clone();
        let send_topic = topic.clone();
        let send = tokio::task::spawn_blocking(move || {
            bus.publish(&send_topic, payload)
                .map_err(|e| PublishError::Bus(format!("{e:?}")))
        });

        match tokio::time::timeout(self.timeout, send).await {
            Err(_) => {
                warn!(topic = %topic, fact = %identity, "publish timed out");
                Err(PublishError::Timeout(self.timeout))
            }
            Ok(Err(join)) => Err(PublishError::Bus(join.to_string())),
            Ok(Ok(result)) => {
                result?;
                info!(topic = %topic, fact = %identity, event_type = event.event_type(), "fact published");
                Ok(Some(identity))
            }
        }
    }

    /// Publish a committed batch in order, stopping at the first failure.
    ///
    /// Returns how many facts were announced.
    pub async fn publish_committed<E>(&self, events: &[E]) -> Result<usize, PublishError>
    where
        E: Announce + Event,
    {
        let mut announced = 0;
        for event in events {
            if self.publish(event).await?.is_some() {
                announced += 1;
            }
        }
        Ok(announced)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use meshsync_core::{OrderId, ProductId};
    use meshsync_events::{
        Delivery, Fact, InMemoryEventBus, OrderCompletedFact, ProductAddedFact, Subscription,
    };
    use meshsync_orders::{LineItemAdded, OrderCompleted, OrderCreated, OrderEvent, OrderLine};
    use meshsync_products::{ProductAdded, ProductEvent, ProductRepriced};
    use rust_decimal::Decimal;

    fn product_added(id: ProductId) -> ProductEvent {
        ProductEvent::ProductAdded(ProductAdded {
            product_id: id,
            name: "Widget".into(),
            price: Some(Decimal::new(999, 2)),
            occurred_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn product_added_goes_to_the_products_topic() {
        let bus = Arc::new(InMemoryEventBus::<String>::new());
        let sub = bus.subscribe("products", "orders-service");
        let publisher = OutboundPublisher::new(bus.clone(), Duration::from_secs(1));
        let id = ProductId::new();

        let identity = publisher.publish(&product_added(id)).await.unwrap();

        assert_eq!(identity, Some(FactIdentity::product(id)));
        let delivery = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        let fact = ProductAddedFact::decode(delivery.message()).unwrap();
        assert_eq!(fact.product_id, id);
        assert_eq!(fact.price, Some(Decimal::new(999, 2)));
    }

    #[tokio::test]
    async fn internal_events_are_not_announced() {
        let bus = Arc::new(InMemoryEventBus::<String>::new());
        let sub = bus.subscribe("products", "orders-service");
        let publisher = OutboundPublisher::new(bus, Duration::from_secs(1));

        let repriced = ProductEvent::ProductRepriced(ProductRepriced {
            product_id: ProductId::new(),
            price: Decimal::new(100, 2),
            occurred_at: Utc::now(),
        });

        assert_eq!(publisher.publish(&repriced).await.unwrap(), None);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn committed_batch_announces_only_the_completion() {
        let bus = Arc::new(InMemoryEventBus::<String>::new());
        let sub = bus.subscribe("order-facts", "inventory");
        let publisher = OutboundPublisher::new(bus, Duration::from_secs(1))
            .with_route(FactKind::OrderCompleted, "order-facts");
        let (order_id, product) = (OrderId::new(), ProductId::new());
        let now = Utc::now();

        let events = vec![
            OrderEvent::OrderCreated(OrderCreated {
                order_id,
                occurred_at: now,
            }),
            OrderEvent::LineItemAdded(LineItemAdded {
                order_id,
                product_number: product,
                quantity: 3,
                occurred_at: now,
            }),
            OrderEvent::OrderCompleted(OrderCompleted {
                order_id,
                line_items: vec![OrderLine {
                    product_number: product,
                    quantity: 3,
                }],
                occurred_at: now,
            }),
        ];

        assert_eq!(publisher.publish_committed(&events).await.unwrap(), 1);
        let fact = OrderCompletedFact::decode(sub.try_recv().unwrap().message()).unwrap();
        assert_eq!(fact.order_id, order_id);
        assert_eq!(fact.line_items[0].quantity, 3);
    }

    #[tokio::test]
    async fn missing_route_is_reported() {
        let bus = Arc::new(InMemoryEventBus::<String>::new());
        let publisher = OutboundPublisher::new(bus, Duration::from_secs(1))
            .without_route(FactKind::ProductAdded);

        let err = publisher
            .publish(&product_added(ProductId::new()))
            .await
            .unwrap_err();

        assert_eq!(err, PublishError::UnknownRoute(FactKind::ProductAdded));
        assert!(!err.is_transient());
    }

    /// A broker that takes its time accepting messages.
    struct SlowBus {
        delay: Duration,
    }

    impl EventBus<String> for SlowBus {
        type Error = String;

        fn publish(&self, _topic: &str, _message: String) -> Result<(), Self::Error> {
            std::thread::sleep(self.delay);
            Ok(())
        }

        fn subscribe(&self, _topic: &str, _group: &str) -> Subscription<Delivery<String>> {
            let (_tx, rx) = std::sync::mpsc::channel();
            Subscription::new(rx)
        }

        fn acknowledge(&self, _delivery: &Delivery<String>) -> Result<(), Self::Error> {
            Ok(())
        }

        fn reject(&self, _delivery: Delivery<String>) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_broker_times_out() {
        let bus = Arc::new(SlowBus {
            delay: Duration::from_millis(300),
        });
        let publisher = OutboundPublisher::new(bus, Duration::from_millis(20));

        let err = publisher
            .publish(&product_added(ProductId::new()))
            .await
            .unwrap_err();

        assert_eq!(err, PublishError::Timeout(Duration::from_millis(20)));
        assert!(err.is_transient());
    }
}
