//! Integration tests for the reconciliation paths between services.
//!
//! Push: Aggregate → OutboundPublisher → EventBus → ConsumerWorker → Applier → Store
//! Pull: partner HTTP collection → IncrementalPoller → Applier → Store + CursorStore
//!
//! Verifies:
//! - Facts announced by one service land in the other exactly once in effect
//! - Redelivery and out-of-order arrival converge
//! - The polling watermark only moves after a fully applied batch

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use chrono::{TimeZone, Utc};
    use httpmock::prelude::*;
    use rust_decimal::Decimal;
    use serde_json::json;

    use meshsync_core::{OrderId, PartnerId, ProductId};
    use meshsync_events::{
        EventBus, FactKind, InMemoryEventBus, OrderCompletedFact, ProductAddedFact, execute,
    };
    use meshsync_inventory::InventoryItem;
    use meshsync_orders::{
        AddLineItem, CompleteOrder, CreateOrder, Order, OrderCommand, OrderEvent, ProductInfo,
    };
    use meshsync_products::{AddProduct, Product, ProductCommand};

    use crate::aggregate_store::{AggregateStore, InMemoryAggregateStore};
    use crate::applier::{InMemoryProcessedFacts, InventoryApplier, ProductInfoApplier};
    use crate::consumer::{
        ConsumerWorker, ConsumerWorkerConfig, EventConsumer, HandlerRegistry, WorkerHandle,
    };
    use crate::cursor_store::{CursorStore, InMemoryCursorStore, Integration};
    use crate::poller::{IncrementalPoller, PartnerLink, PollError};
    use crate::publisher::OutboundPublisher;
    use crate::remote::HttpEventSource;

    type Bus = Arc<InMemoryEventBus<String>>;
    type Inventory = Arc<InMemoryAggregateStore<InventoryItem>>;
    type Catalog = Arc<InMemoryAggregateStore<ProductInfo>>;

    /// Both services wired to one in-memory broker.
    struct Mesh {
        bus: Bus,
        inventory: Inventory,
        product_info: Catalog,
        workers: Vec<WorkerHandle>,
    }

    impl Mesh {
        fn start() -> Self {
            let bus: Bus = Arc::new(InMemoryEventBus::new());
            let inventory: Inventory = Arc::new(InMemoryAggregateStore::new());
            let product_info: Catalog = Arc::new(InMemoryAggregateStore::new());

            let inventory_applier = Arc::new(InventoryApplier::new(
                inventory.clone(),
                InMemoryProcessedFacts::new(1_000),
                5,
            ));
            let products = inventory_applier.clone();
            let orders = inventory_applier;
            let inventory_consumer = Arc::new(EventConsumer::new(
                HandlerRegistry::new()
                    .register::<ProductAddedFact, _, _>("products", move |f| {
                        products.apply_product_added(&f)
                    })
                    .register::<OrderCompletedFact, _, _>("orders", move |f| {
                        orders.apply_order_completed(&f)
                    }),
            ));

            let info_applier = ProductInfoApplier::new(product_info.clone(), 5);
            let orders_consumer = Arc::new(EventConsumer::new(
                HandlerRegistry::new().register::<ProductAddedFact, _, _>("products", move |f| {
                    info_applier.apply_product_info(&f)
                }),
            ));

            let retry = Duration::from_millis(5);
            let workers = vec![
                ConsumerWorker::spawn(
                    ConsumerWorkerConfig::new("products", "inventory").with_retry_backoff(retry),
                    bus.clone(),
                    inventory_consumer.clone(),
                )
                .unwrap(),
                ConsumerWorker::spawn(
                    ConsumerWorkerConfig::new("orders", "inventory")
                        .with_retry_backoff(retry)
                        .with_max_deliveries(0),
                    bus.clone(),
                    inventory_consumer,
                )
                .unwrap(),
                ConsumerWorker::spawn(
                    ConsumerWorkerConfig::new("products", "orders").with_retry_backoff(retry),
                    bus.clone(),
                    orders_consumer,
                )
                .unwrap(),
            ];

            Self {
                bus,
                inventory,
                product_info,
                workers,
            }
        }

        fn publisher(&self) -> OutboundPublisher<InMemoryEventBus<String>> {
            OutboundPublisher::new(self.bus.clone(), Duration::from_secs(1))
        }

        fn quantity(&self, id: ProductId) -> Option<i64> {
            self.inventory
                .load(&id)
                .unwrap()
                .map(|r| r.value.quantity())
        }

        fn stop(self) {
            for w in self.workers {
                w.shutdown();
            }
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn add_product(id: ProductId, name: &str) -> Vec<meshsync_products::ProductEvent> {
        let mut product = Product::empty(id);
        execute(
            &mut product,
            &ProductCommand::AddProduct(AddProduct {
                product_id: id,
                name: name.to_string(),
                price: Some(Decimal::new(1999, 2)),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap()
    }

    fn complete_order(id: OrderId, lines: &[(ProductId, u64)]) -> Vec<OrderEvent> {
        let now = Utc::now();
        let mut order = Order::empty(id);
        let mut events = execute(
            &mut order,
            &OrderCommand::CreateOrder(CreateOrder {
                order_id: id,
                occurred_at: now,
            }),
        )
        .unwrap();
        for (product, quantity) in lines {
            events.extend(
                execute(
                    &mut order,
                    &OrderCommand::AddLineItem(AddLineItem {
                        order_id: id,
                        product_number: *product,
                        quantity: *quantity,
                        occurred_at: now,
                    }),
                )
                .unwrap(),
            );
        }
        events.extend(
            execute(
                &mut order,
                &OrderCommand::CompleteOrder(CompleteOrder {
                    order_id: id,
                    occurred_at: now,
                }),
            )
            .unwrap(),
        );
        events
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn product_added_reaches_both_services() {
        let mesh = Mesh::start();
        let p1 = ProductId::new();

        let announced = mesh
            .publisher()
            .publish_committed(&add_product(p1, "Widget"))
            .await
            .unwrap();
        assert_eq!(announced, 1);

        eventually(|| mesh.quantity(p1) == Some(0)).await;
        eventually(|| mesh.product_info.load(&p1).unwrap().is_some()).await;
        let info = mesh.product_info.load(&p1).unwrap().unwrap().value;
        assert_eq!(info.description(), "Widget");
        assert_eq!(info.price(), Some(Decimal::new(1999, 2)));

        mesh.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_order_delivery_decrements_once() {
        let mesh = Mesh::start();
        let publisher = mesh.publisher();
        let p1 = ProductId::new();
        publisher.publish_committed(&add_product(p1, "Widget")).await.unwrap();
        eventually(|| mesh.quantity(p1).is_some()).await;

        let events = complete_order(OrderId::new(), &[(p1, 3)]);
        publisher.publish_committed(&events).await.unwrap();
        // A producer retry after an ambiguous timeout.
        publisher.publish_committed(&events).await.unwrap();

        eventually(|| mesh.bus.acknowledged() >= 4).await;
        assert_eq!(mesh.quantity(p1), Some(-3));

        mesh.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn order_before_product_converges_after_redelivery() {
        let mesh = Mesh::start();
        let publisher = mesh.publisher();
        let p1 = ProductId::new();

        publisher
            .publish_committed(&complete_order(OrderId::new(), &[(p1, 2)]))
            .await
            .unwrap();
        eventually(|| mesh.bus.rejected() >= 1).await;
        assert_eq!(mesh.quantity(p1), None);

        publisher.publish_committed(&add_product(p1, "Late")).await.unwrap();

        eventually(|| mesh.quantity(p1) == Some(-2)).await;
        mesh.stop();
    }

    fn product_item(id: ProductId, name: &str, published: &str) -> serde_json::Value {
        json!({
            "publicationDate": published,
            "product": { "id": id.to_string(), "name": name }
        })
    }

    fn catalog_link(server: &MockServer) -> PartnerLink {
        PartnerLink {
            partner_id: PartnerId::new("catalog").unwrap(),
            kind: FactKind::ProductAdded,
            template: format!("{}{{?type,since}}", server.url("/events")),
        }
    }

    #[tokio::test]
    async fn polled_widget_is_created_and_watermark_advances() {
        let server = MockServer::start_async().await;
        let p1 = ProductId::new();
        let events = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/events")
                    .query_param("type", "productAdded")
                    .query_param("since", "2024-01-01T00:00:00Z");
                then.status(200)
                    .header("content-type", "application/hal+json")
                    .json_body(json!({
                        "_embedded": { "events": [product_item(p1, "Widget", "2024-01-02T00:00:00Z")] }
                    }));
            })
            .await;

        let partner = PartnerId::new("catalog").unwrap();
        let cursors = Arc::new(InMemoryCursorStore::seeded([Integration::with_last_update(
            partner.clone(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )]));
        let inventory: Inventory = Arc::new(InMemoryAggregateStore::new());
        let applier = InventoryApplier::new(inventory.clone(), InMemoryProcessedFacts::new(16), 5);
        let poller = IncrementalPoller::new::<ProductAddedFact, _, _>(
            catalog_link(&server),
            cursors.clone(),
            HttpEventSource::new(Duration::from_secs(5)).unwrap(),
            move |f| applier.apply_product_added(&f),
        )
        .unwrap();

        let report = poller.poll_once().await.unwrap();

        events.assert_async().await;
        assert_eq!(report.applied, 1);
        let item = inventory.load(&p1).unwrap().unwrap().value;
        assert_eq!(item.name(), "Widget");
        assert_eq!(item.quantity(), 0);
        assert_eq!(
            cursors.load(&partner).await.unwrap().unwrap().last_update(),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn polled_orders_follow_pages_and_survive_a_failed_cycle() {
        let server = MockServer::start_async().await;
        let (p1, o1, o2) = (ProductId::new(), OrderId::new(), OrderId::new());
        let order = |id: OrderId, published: &str| {
            json!({
                "publicationDate": published,
                "order": { "id": id.to_string(), "lineItems": [ { "productNumber": p1.to_string(), "quantity": 1 } ] }
            })
        };

        let first = server
            .mock_async(|when, then| {
                when.method(GET).path("/events").query_param("type", "orderCompleted");
                then.status(200).json_body(json!({
                    "_embedded": { "orderCompleteds": [order(o1, "2024-03-01T10:00:00Z")] },
                    "_links": { "next": { "href": "/events/page/2" } }
                }));
            })
            .await;
        let mut second = server
            .mock_async(|when, then| {
                when.method(GET).path("/events/page/2");
                then.status(502);
            })
            .await;

        let partner = PartnerId::new("orders").unwrap();
        let cursors = Arc::new(InMemoryCursorStore::new());
        let inventory: Inventory = Arc::new(InMemoryAggregateStore::new());
        let applier = Arc::new(InventoryApplier::new(
            inventory.clone(),
            InMemoryProcessedFacts::new(16),
            5,
        ));
        applier
            .apply_product_added(&ProductAddedFact {
                product_id: p1,
                name: "Widget".into(),
                price: None,
            })
            .unwrap();
        let a = applier.clone();
        let poller = IncrementalPoller::new::<OrderCompletedFact, _, _>(
            PartnerLink {
                partner_id: partner.clone(),
                kind: FactKind::OrderCompleted,
                template: format!("{}{{?type,since}}", server.url("/events")),
            },
            cursors.clone(),
            HttpEventSource::new(Duration::from_secs(5)).unwrap(),
            move |f| a.apply_order_completed(&f),
        )
        .unwrap();

        // Page 2 fails: page 1 was applied but the watermark stays put.
        let err = poller.poll_once().await.unwrap_err();
        assert!(matches!(err, PollError::Fetch(_)));
        assert!(cursors.load(&partner).await.unwrap().is_none());
        assert_eq!(inventory.load(&p1).unwrap().unwrap().value.quantity(), -1);

        second.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/events/page/2");
                then.status(200).json_body(json!({
                    "_embedded": { "orderCompleteds": [order(o2, "2024-03-01T11:00:00Z")] }
                }));
            })
            .await;

        // The retry sees page 1 again; the order is not applied twice.
        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(first.hits_async().await, 2);
        assert_eq!(inventory.load(&p1).unwrap().unwrap().value.quantity(), -2);
        assert_eq!(
            cursors.load(&partner).await.unwrap().unwrap().last_update(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let bus = InMemoryEventBus::<String>::new();
        assert!(bus.publish("orders", "{}".to_string()).is_ok());
    }
}
