use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use meshsync_events::{Delivery, EventBus, Subscription};

use super::{Disposition, EventConsumer, FaultKind};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                warn!("consumer worker panicked before shutdown");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerWorkerConfig {
    pub name: String,
    pub topic: String,
    /// Consumer group; workers sharing a group split the topic's messages.
    pub group: String,
    /// Deliveries beyond this many are dropped as poison. 0 disables the guard.
    pub max_deliveries: u32,
    /// Pause before handing a failed delivery back, doubled per attempt.
    pub retry_backoff: Duration,
}

impl ConsumerWorkerConfig {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        let topic = topic.into();
        let group = group.into();
        Self {
            name: format!("consumer-{topic}"),
            topic,
            group,
            max_deliveries: 10,
            retry_backoff: Duration::from_millis(100),
        }
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(6);
        self.retry_backoff
            .saturating_mul(factor)
            .min(Duration::from_secs(5))
    }
}

/// Feeds one topic subscription through an [`EventConsumer`].
///
/// - acknowledges or rejects every delivery according to its [`Disposition`]
/// - drops deliveries that keep failing after `max_deliveries` attempts
/// - stops on shutdown or when the bus closes the subscription
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    pub fn spawn<B>(
        config: ConsumerWorkerConfig,
        bus: B,
        consumer: Arc<EventConsumer>,
    ) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<String> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe(&config.topic, &config.group);

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || worker_loop(&config, &bus, sub, shutdown_rx, &consumer))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<B>(
    config: &ConsumerWorkerConfig,
    bus: &B,
    sub: Subscription<Delivery<String>>,
    shutdown_rx: mpsc::Receiver<()>,
    consumer: &EventConsumer,
) where
    B: EventBus<String>,
{
    let tick = Duration::from_millis(250);
    info!(worker = %config.name, topic = %config.topic, group = %config.group, "consumer worker started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(delivery) => handle_delivery(config, bus, consumer, delivery),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = %config.name, "consumer worker stopped");
}

fn handle_delivery<B>(
    config: &ConsumerWorkerConfig,
    bus: &B,
    consumer: &EventConsumer,
    delivery: Delivery<String>,
) where
    B: EventBus<String>,
{
    let topic = delivery.topic().to_string();

    if config.max_deliveries > 0 && delivery.attempt() > config.max_deliveries {
        error!(
            worker = %config.name,
            topic = %topic,
            attempt = delivery.attempt(),
            "giving up on message after repeated failures"
        );
        consumer.report(
            FaultKind::Poison,
            &topic,
            &format!("not applied after {} deliveries", config.max_deliveries),
            delivery.message(),
        );
        if let Err(err) = bus.acknowledge(&delivery) {
            warn!(worker = %config.name, error = ?err, "acknowledge failed");
        }
        return;
    }

    match consumer.on_fact(&topic, delivery.message()) {
        Disposition::Ack => {
            if let Err(err) = bus.acknowledge(&delivery) {
                warn!(worker = %config.name, error = ?err, "acknowledge failed");
            }
        }
        Disposition::Retry => {
            thread::sleep(config.backoff(delivery.attempt()));
            if let Err(err) = bus.reject(delivery) {
                warn!(worker = %config.name, error = ?err, "reject failed; relying on transport redelivery");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Instant;

    use super::*;
    use crate::applier::ApplyError;
    use crate::consumer::HandlerRegistry;
    use meshsync_core::ProductId;
    use meshsync_events::{Fact, InMemoryEventBus, ProductAddedFact};

    fn payload() -> String {
        ProductAddedFact {
            product_id: ProductId::new(),
            name: "Widget".into(),
            price: None,
        }
        .encode()
        .unwrap()
    }

    fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn acknowledges_applied_messages() {
        let bus = Arc::new(InMemoryEventBus::<String>::new());
        let registry = HandlerRegistry::new()
            .register::<ProductAddedFact, _, _>("products", |_f| Ok::<_, ApplyError>(()));
        let consumer = Arc::new(EventConsumer::new(registry));

        let handle = ConsumerWorker::spawn(
            ConsumerWorkerConfig::new("products", "inventory"),
            bus.clone(),
            consumer,
        )
        .unwrap();

        bus.publish("products", payload()).unwrap();
        wait_until(|| bus.acknowledged() == 1);
        handle.shutdown();
    }

    #[test]
    fn poison_message_is_dropped_after_max_deliveries() {
        let bus = Arc::new(InMemoryEventBus::<String>::new());
        let registry = HandlerRegistry::new().register::<ProductAddedFact, _, _>(
            "products",
            |f| Err::<(), _>(ApplyError::UnknownProduct(f.product_id)),
        );
        let (tx, rx) = mpsc::channel();
        let consumer = Arc::new(EventConsumer::new(registry).with_faults(tx));

        let handle = ConsumerWorker::spawn(
            ConsumerWorkerConfig::new("products", "inventory")
                .with_max_deliveries(3)
                .with_retry_backoff(Duration::from_millis(1)),
            bus.clone(),
            consumer,
        )
        .unwrap();

        bus.publish("products", payload()).unwrap();
        let fault = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(fault.kind, FaultKind::Poison);
        assert_eq!(bus.rejected(), 3);
        wait_until(|| bus.acknowledged() == 1);
        handle.shutdown();
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let config = ConsumerWorkerConfig::new("t", "g").with_retry_backoff(Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(30), Duration::from_secs(5));
    }
}
