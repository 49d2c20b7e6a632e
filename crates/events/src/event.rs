use chrono::{DateTime, Utc};

/// A local domain event.
///
/// Events are:
/// - **immutable** (treat them as facts about this service)
/// - **versioned** (schema evolution)
///
/// Events that partners care about are turned into outbound facts through
/// [`crate::Announce`].
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "orders.order.completed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
