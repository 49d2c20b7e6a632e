/// One delivery of a broker message to a subscription.
///
/// The same logical message may be delivered several times (at-least-once);
/// `attempt` starts at 1 and grows with every redelivery the transport makes.
///
/// `subscriber` and `tag` are opaque to consumers. Transports use them to route
/// `acknowledge`/`reject` back to the right pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<M> {
    topic: String,
    subscriber: String,
    tag: String,
    attempt: u32,
    message: M,
}

impl<M> Delivery<M> {
    pub fn new(
        topic: impl Into<String>,
        subscriber: impl Into<String>,
        tag: impl Into<String>,
        attempt: u32,
        message: M,
    ) -> Self {
        Self {
            topic: topic.into(),
            subscriber: subscriber.into(),
            tag: tag.into(),
            attempt,
            message,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    /// The same message, handed out again.
    pub fn redelivered(self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self
        }
    }
}
