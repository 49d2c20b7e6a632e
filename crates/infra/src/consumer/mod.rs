//! Broker-facing consumption of partner facts.
//!
//! ```text
//! Delivery ─► ConsumerWorker ─► EventConsumer::on_fact(topic, raw)
//!                                   │  HandlerRegistry: topic → decode + applier
//!                                   ▼
//!                         Disposition::Ack / Disposition::Retry
//! ```

pub mod registry;
pub mod worker;

use std::sync::Mutex;
use std::sync::mpsc::Sender;

use tracing::{debug, error, warn};

pub use registry::{HandleError, HandlerRegistry};
pub use worker::{ConsumerWorker, ConsumerWorkerConfig, WorkerHandle};

/// What to tell the broker about a delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Leave unacknowledged so the broker redelivers it.
    Retry,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultKind {
    Malformed,
    UnknownTopic,
    /// The applier refused the fact for good.
    Rejected,
    /// Redelivered too many times; dropped.
    Poison,
}

/// A message that was acknowledged without being applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerFault {
    pub kind: FaultKind,
    pub topic: String,
    pub reason: String,
    pub payload: String,
}

/// Decodes raw broker payloads and hands them to the registered applier.
///
/// Stateless apart from the registry built at startup.
pub struct EventConsumer {
    registry: HandlerRegistry,
    faults: Option<Mutex<Sender<ConsumerFault>>>,
}

impl EventConsumer {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            faults: None,
        }
    }

    /// Report permanently failed messages on `faults`.
    pub fn with_faults(mut self, faults: Sender<ConsumerFault>) -> Self {
        self.faults = Some(Mutex::new(faults));
        self
    }

    pub fn topics(&self) -> Vec<String> {
        self.registry.topics()
    }

    pub fn on_fact(&self, topic: &str, raw: &str) -> Disposition {
        let Some(handler) = self.registry.get(topic) else {
            error!(topic, "no handler registered for topic; dropping message");
            self.report(FaultKind::UnknownTopic, topic, "no handler registered", raw);
            return Disposition::Ack;
        };

        match handler(raw) {
            Ok(()) => {
                debug!(topic, "fact applied");
                Disposition::Ack
            }
            Err(HandleError::Decode(err)) => {
                error!(topic, error = %err, "malformed payload; dropping message");
                self.report(FaultKind::Malformed, topic, &err.to_string(), raw);
                Disposition::Ack
            }
            Err(HandleError::Apply(err)) if err.is_transient() => {
                warn!(topic, error = %err, "fact not applied yet; will retry");
                Disposition::Retry
            }
            Err(HandleError::Apply(err)) => {
                error!(topic, error = %err, "fact rejected; dropping message");
                self.report(FaultKind::Rejected, topic, &err.to_string(), raw);
                Disposition::Ack
            }
        }
    }

    pub(crate) fn report(&self, kind: FaultKind, topic: &str, reason: &str, payload: &str) {
        let Some(faults) = &self.faults else {
            return;
        };
        let fault = ConsumerFault {
            kind,
            topic: topic.to_string(),
            reason: reason.to_string(),
            payload: payload.to_string(),
        };
        match faults.lock() {
            Ok(tx) => {
                if tx.send(fault).is_err() {
                    warn!(topic, ?kind, "fault receiver gone; fault not reported");
                }
            }
            Err(_) => warn!(topic, ?kind, "fault channel poisoned; fault not reported"),
        }
    }
}
