//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! - **Stream per topic**: `meshsync:<topic>`
//! - **Consumer groups**: one per consuming service (e.g. `inventory`);
//!   consumers within a group split the stream
//! - **Acknowledgement**: `XACK` on acknowledge; a rejected entry stays pending
//!   and is reclaimed with `XCLAIM` once idle for `pending_timeout`
//! - **Dead-letter stream**: `meshsync:<topic>:dlq`, for entries delivered
//!   more than `max_retries` times

use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tracing::{debug, error, instrument, warn};

use meshsync_events::{Delivery, EventBus, Subscription, SubscriptionHandle};

const DEFAULT_PREFIX: &str = "meshsync";
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 30_000;
const READ_COUNT: usize = 10;
const READ_BLOCK_MS: u64 = 100;
const RECONNECT_DELAY: Duration = Duration::from_millis(250);
const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    prefix: String,
    max_retries: u32,
    pending_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("malformed delivery: {0}")]
    Delivery(String),
}

impl RedisStreamsEventBus {
    /// `redis_url` e.g. `redis://localhost:6379`.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            prefix: DEFAULT_PREFIX.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout_ms = timeout.as_millis() as u64;
        self
    }

    fn stream_key(&self, topic: &str) -> String {
        format!("{}:{topic}", self.prefix)
    }

    fn dlq_key(&self, topic: &str) -> String {
        format!("{}:{topic}:dlq", self.prefix)
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Ensure a consumer group exists (idempotent).
    pub fn ensure_consumer_group(&self, topic: &str, group: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;

        // MKSTREAM creates the stream; an existing group answers BUSYGROUP.
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.stream_key(topic))
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    #[instrument(skip(self, payload), fields(stream = %self.stream_key(topic)), err)]
    fn publish_sync(&self, topic: &str, payload: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("XADD")
            .arg(self.stream_key(topic))
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;
        Ok(())
    }

    fn acknowledge_sync(&self, topic: &str, group: &str, id: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("XACK")
            .arg(self.stream_key(topic))
            .arg(group)
            .arg(id)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    fn dead_letter_sync(
        &self,
        conn: &mut redis::Connection,
        topic: &str,
        group: &str,
        entry: &StreamId,
        deliveries: usize,
    ) -> Result<(), RedisStreamsError> {
        let payload: String = entry.get(PAYLOAD_FIELD).unwrap_or_default();
        let _: String = redis::cmd("XADD")
            .arg(self.dlq_key(topic))
            .arg("*")
            .arg("original_id")
            .arg(&entry.id)
            .arg("group")
            .arg(group)
            .arg("deliveries")
            .arg(deliveries.to_string())
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;
        let _: u64 = redis::cmd("XACK")
            .arg(self.stream_key(topic))
            .arg(group)
            .arg(&entry.id)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;

        warn!(topic, group, message_id = %entry.id, deliveries, "message moved to dead-letter stream");
        Ok(())
    }

    /// Take over entries that have been pending too long, dead-lettering the
    /// ones that exhausted their retries.
    fn reclaim_sync(
        &self,
        conn: &mut redis::Connection,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Vec<(StreamId, u32)>, RedisStreamsError> {
        let key = self.stream_key(topic);
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&key)
            .arg(group)
            .arg("IDLE")
            .arg(self.pending_timeout_ms)
            .arg("-")
            .arg("+")
            .arg(READ_COUNT)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        if pending.ids.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&key)
            .arg(group)
            .arg(consumer)
            .arg(self.pending_timeout_ms)
            .arg(&ids[..])
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;

        let mut redelivered = Vec::new();
        for entry in claimed.ids {
            let deliveries = pending
                .ids
                .iter()
                .find(|p| p.id == entry.id)
                .map(|p| p.times_delivered)
                .unwrap_or(1);

            if deliveries as u64 > u64::from(self.max_retries) {
                self.dead_letter_sync(conn, topic, group, &entry, deliveries)?;
                continue;
            }
            let attempt = u32::try_from(deliveries + 1).unwrap_or(u32::MAX);
            redelivered.push((entry, attempt));
        }
        Ok(redelivered)
    }

    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Vec<(StreamId, u32)>, RedisStreamsError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(READ_COUNT)
            .arg("BLOCK")
            .arg(READ_BLOCK_MS)
            .arg("STREAMS")
            .arg(self.stream_key(topic))
            .arg(">")
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).map(|id| (id, 1)).collect())
            .unwrap_or_default())
    }

    /// Start the thread that feeds one subscription. It stops once the
    /// subscription is dropped, checked before every blocking read.
    fn spawn_reader(
        &self,
        topic: &str,
        group: &str,
        handle: SubscriptionHandle,
        tx: Sender<Delivery<String>>,
    ) -> std::io::Result<JoinHandle<()>> {
        let bus = self.clone();
        let topic = topic.to_string();
        let group = group.to_string();
        let consumer = format!("{group}-{}", uuid::Uuid::now_v7());

        thread::Builder::new()
            .name(format!("redis-{topic}"))
            .spawn(move || bus.poll_loop(&topic, &group, &consumer, &handle, &tx))
    }

    fn poll_loop(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        handle: &SubscriptionHandle,
        tx: &Sender<Delivery<String>>,
    ) {
        let subscriber = format!("{group}|{consumer}");
        let mut conn: Option<redis::Connection> = None;

        while !handle.is_closed() {
            if conn.is_none() {
                match self.connection() {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        error!(topic, group, error = %e, "redis unavailable; retrying");
                        thread::sleep(RECONNECT_DELAY);
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else {
                continue;
            };

            let batch = self
                .reclaim_sync(c, topic, group, consumer)
                .and_then(|mut reclaimed| {
                    // Entries read after the subscription closed would sit in
                    // this consumer's pending list until reclaimed.
                    if !handle.is_closed() {
                        reclaimed.extend(self.read_new_sync(c, topic, group, consumer)?);
                    }
                    Ok(reclaimed)
                });

            let entries = match batch {
                Ok(entries) => entries,
                Err(e) => {
                    error!(topic, group, error = %e, "failed to read from stream");
                    conn = None;
                    thread::sleep(Duration::from_millis(500));
                    continue;
                }
            };

            for (entry, attempt) in entries {
                let Some(payload) = entry.get::<String>(PAYLOAD_FIELD) else {
                    warn!(topic, message_id = %entry.id, "stream entry without payload; acknowledging");
                    if let Err(e) = self.acknowledge_sync(topic, group, &entry.id) {
                        warn!(topic, message_id = %entry.id, error = %e, "failed to acknowledge empty entry");
                    }
                    continue;
                };
                let delivery = Delivery::new(topic, subscriber.clone(), entry.id, attempt, payload);
                if tx.send(delivery).is_err() {
                    break;
                }
            }
        }

        debug!(topic, group, consumer, "subscription closed; reader stopped");
    }
}

impl EventBus<String> for RedisStreamsEventBus {
    type Error = RedisStreamsError;

    fn publish(&self, topic: &str, message: String) -> Result<(), Self::Error> {
        self.publish_sync(topic, &message)
    }

    /// Joins `group` as a fresh consumer; a background thread reads the
    /// stream and feeds the returned subscription.
    fn subscribe(&self, topic: &str, group: &str) -> Subscription<Delivery<String>> {
        if let Err(e) = self.ensure_consumer_group(topic, group) {
            error!(topic, group, error = %e, "failed to create consumer group");
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let subscription = Subscription::new(rx);

        if let Err(e) = self.spawn_reader(topic, group, subscription.handle(), tx) {
            error!(topic, group, error = %e, "failed to spawn stream reader");
        }

        subscription
    }

    fn acknowledge(&self, delivery: &Delivery<String>) -> Result<(), Self::Error> {
        let (group, _) = delivery
            .subscriber()
            .split_once('|')
            .ok_or_else(|| RedisStreamsError::Delivery(delivery.subscriber().to_string()))?;
        self.acknowledge_sync(delivery.topic(), group, delivery.tag())
    }

    /// The entry stays pending and is reclaimed after `pending_timeout`.
    fn reject(&self, delivery: Delivery<String>) -> Result<(), Self::Error> {
        debug!(topic = delivery.topic(), message_id = delivery.tag(), "delivery left pending for redelivery");
        Ok(())
    }
}
