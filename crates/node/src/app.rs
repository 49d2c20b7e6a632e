use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use meshsync_events::{EventBus, FactKind, InMemoryEventBus, OrderCompletedFact, ProductAddedFact};
use meshsync_infra::event_bus::RedisStreamsEventBus;
use meshsync_infra::{
    ConsumerWorker, ConsumerWorkerConfig, CursorStore, EventConsumer, HandlerRegistry,
    HttpEventSource, InMemoryAggregateStore, InMemoryCursorStore, InMemoryProcessedFacts,
    IncrementalPoller, IntegrationConfig, InventoryApplier, PartnerLink, PollError, PollerWorker,
    PostgresCursorStore, WorkerHandle,
};
use meshsync_inventory::InventoryItem;

/// Consumer group the inventory service joins on every topic.
pub const CONSUMER_GROUP: &str = "inventory";

pub type InventoryStore = Arc<InMemoryAggregateStore<InventoryItem>>;
type Applier = Arc<InventoryApplier<InventoryStore, InMemoryProcessedFacts>>;

/// A running node. Dropping it leaves the background tasks running; call
/// [`InventoryNode::shutdown`].
pub struct InventoryNode {
    inventory: InventoryStore,
    cancel: CancellationToken,
    pollers: Vec<JoinHandle<()>>,
    workers: Vec<WorkerHandle>,
}

impl InventoryNode {
    pub fn inventory(&self) -> &InventoryStore {
        &self.inventory
    }

    pub fn poller_count(&self) -> usize {
        self.pollers.len()
    }

    /// Stop pollers between cycles, then stop the consumer workers.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for poller in self.pollers {
            if let Err(e) = poller.await {
                warn!(error = %e, "poller task ended abnormally");
            }
        }

        let workers = self.workers;
        let joined = tokio::task::spawn_blocking(move || {
            for w in workers {
                w.shutdown();
            }
        })
        .await;
        if let Err(e) = joined {
            warn!(error = %e, "consumer workers did not stop cleanly");
        }
        info!("node stopped");
    }
}

/// Pick transports from `config` and start the node.
pub async fn start(config: &IntegrationConfig) -> anyhow::Result<InventoryNode> {
    let cursors: Arc<dyn CursorStore> = match &config.database_url {
        Some(url) => Arc::new(
            PostgresCursorStore::connect(url)
                .await
                .context("failed to open cursor store")?,
        ),
        None => {
            warn!("DATABASE_URL not set; polling watermarks are kept in memory only");
            Arc::new(InMemoryCursorStore::new())
        }
    };

    match &config.redis_url {
        Some(url) => {
            let bus = RedisStreamsEventBus::new(url)
                .context("invalid REDIS_URL")?
                .with_max_retries(config.max_deliveries);
            start_with(config, Arc::new(bus), cursors)
        }
        None => {
            warn!("REDIS_URL not set; using the in-process bus");
            start_with(config, Arc::new(InMemoryEventBus::<String>::new()), cursors)
        }
    }
}

/// Start the node on the given transports.
pub fn start_with<B>(
    config: &IntegrationConfig,
    bus: Arc<B>,
    cursors: Arc<dyn CursorStore>,
) -> anyhow::Result<InventoryNode>
where
    B: EventBus<String> + 'static,
{
    let inventory: InventoryStore = Arc::new(InMemoryAggregateStore::new());
    let applier: Applier = Arc::new(InventoryApplier::new(
        inventory.clone(),
        InMemoryProcessedFacts::new(config.dedup_capacity),
        config.max_conflict_retries,
    ));

    let products = applier.clone();
    let orders = applier.clone();
    let consumer = Arc::new(EventConsumer::new(
        HandlerRegistry::new()
            .register::<ProductAddedFact, _, _>(config.topic_for(FactKind::ProductAdded), move |f| {
                products.apply_product_added(&f)
            })
            .register::<OrderCompletedFact, _, _>(
                config.topic_for(FactKind::OrderCompleted),
                move |f| orders.apply_order_completed(&f),
            ),
    ));

    let mut workers = Vec::new();
    for topic in consumer.topics() {
        let worker = ConsumerWorker::spawn(
            ConsumerWorkerConfig::new(topic.clone(), CONSUMER_GROUP)
                .with_max_deliveries(config.max_deliveries),
            bus.clone(),
            consumer.clone(),
        )
        .with_context(|| format!("failed to start consumer for {topic}"))?;
        workers.push(worker);
    }

    let cancel = CancellationToken::new();
    let source = Arc::new(HttpEventSource::new(config.fetch_timeout)?);
    let mut pollers = Vec::new();
    for link in &config.partners {
        match spawn_poller(link, &applier, &cursors, &source, config, &cancel) {
            Ok(handle) => pollers.push(handle),
            Err(e) => error!(partner = %link.partner_id, error = %e, "partner disabled"),
        }
    }

    info!(
        topics = ?consumer.topics(),
        partners = pollers.len(),
        "inventory node started"
    );

    Ok(InventoryNode {
        inventory,
        cancel,
        pollers,
        workers,
    })
}

fn spawn_poller(
    link: &PartnerLink,
    applier: &Applier,
    cursors: &Arc<dyn CursorStore>,
    source: &Arc<HttpEventSource>,
    config: &IntegrationConfig,
    cancel: &CancellationToken,
) -> Result<JoinHandle<()>, PollError> {
    let a = applier.clone();
    let handle = match link.kind {
        FactKind::ProductAdded => PollerWorker::spawn(
            IncrementalPoller::new::<ProductAddedFact, _, _>(
                link.clone(),
                cursors.clone(),
                source.clone(),
                move |f| a.apply_product_added(&f),
            )?,
            config.poll_interval,
            cancel.child_token(),
        ),
        FactKind::OrderCompleted => PollerWorker::spawn(
            IncrementalPoller::new::<OrderCompletedFact, _, _>(
                link.clone(),
                cursors.clone(),
                source.clone(),
                move |f| a.apply_order_completed(&f),
            )?,
            config.poll_interval,
            cancel.child_token(),
        ),
    };
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use meshsync_core::{PartnerId, ProductId};
    use meshsync_events::Fact;
    use meshsync_infra::AggregateStore;

    fn config() -> IntegrationConfig {
        IntegrationConfig {
            max_deliveries: 3,
            ..IntegrationConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn consumes_product_facts_from_the_bus() {
        let bus = Arc::new(InMemoryEventBus::<String>::new());
        let node = start_with(&config(), bus.clone(), Arc::new(InMemoryCursorStore::new())).unwrap();
        let id = ProductId::new();

        let payload = ProductAddedFact {
            product_id: id,
            name: "Widget".into(),
            price: None,
        }
        .encode()
        .unwrap();
        bus.publish("products", payload).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while node.inventory().load(&id).unwrap().is_none() {
            assert!(Instant::now() < deadline, "product never arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        node.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn misconfigured_partner_is_skipped() {
        let mut config = config();
        config.partners = vec![
            PartnerLink {
                partner_id: PartnerId::new("broken").unwrap(),
                kind: FactKind::ProductAdded,
                template: "http://catalog/{?type".to_string(),
            },
            PartnerLink {
                partner_id: PartnerId::new("catalog").unwrap(),
                kind: FactKind::ProductAdded,
                template: "http://127.0.0.1:9/events{?type,since}".to_string(),
            },
        ];

        let node = start_with(
            &config,
            Arc::new(InMemoryEventBus::<String>::new()),
            Arc::new(InMemoryCursorStore::new()),
        )
        .unwrap();

        assert_eq!(node.poller_count(), 1);
        node.shutdown().await;
    }
}
