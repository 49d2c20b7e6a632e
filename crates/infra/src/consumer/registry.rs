use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use meshsync_events::{CodecError, Fact};

use crate::applier::ApplyError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandleError {
    #[error(transparent)]
    Decode(CodecError),

    #[error(transparent)]
    Apply(ApplyError),
}

pub(crate) type BoxedHandler = Box<dyn Fn(&str) -> Result<(), HandleError> + Send + Sync>;

/// Topic → handler table, built once at startup and moved into the consumer.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `topic` to `handler`, decoding payloads as `F` first.
    ///
    /// Registering a topic twice replaces the earlier handler.
    pub fn register<F, H, O>(mut self, topic: impl Into<String>, handler: H) -> Self
    where
        F: Fact,
        H: Fn(F) -> Result<O, ApplyError> + Send + Sync + 'static,
        O: core::fmt::Debug,
    {
        let topic = topic.into();
        let wrapped: BoxedHandler = Box::new(move |raw: &str| {
            let fact = F::decode(raw).map_err(HandleError::Decode)?;
            let identity = fact.identity();
            let outcome = handler(fact).map_err(HandleError::Apply)?;
            debug!(kind = %F::KIND, fact = %identity, ?outcome, "handler finished");
            Ok(())
        });
        self.handlers.insert(topic, wrapped);
        self
    }

    pub fn get(&self, topic: &str) -> Option<&BoxedHandler> {
        self.handlers.get(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshsync_core::ProductId;
    use meshsync_events::ProductAddedFact;

    #[test]
    fn register_wraps_decoding() {
        let registry = HandlerRegistry::new()
            .register::<ProductAddedFact, _, _>("products", |fact| Ok(fact.name));

        let handler = registry.get("products").unwrap();
        let payload = ProductAddedFact {
            product_id: ProductId::new(),
            name: "Widget".into(),
            price: None,
        }
        .encode()
        .unwrap();

        assert_eq!(handler(&payload), Ok(()));
        assert!(matches!(handler("[]"), Err(HandleError::Decode(_))));
        assert!(registry.get("orders").is_none());
        assert_eq!(registry.topics(), vec!["products".to_string()]);
    }
}
