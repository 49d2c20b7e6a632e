//! `meshsync-events`: local events, cross-service facts and the broker seam.
//!
//! - [`Event`]: something that happened inside *this* service.
//! - [`Fact`]: something that happened in *another* service, as received over
//!   the wire. Facts are immutable and carry no ordering token.
//! - [`EventBus`]: the transport seam (publish, subscribe, acknowledge, reject).

pub mod bus;
pub mod delivery;
pub mod event;
pub mod fact;
pub mod handler;
pub mod in_memory_bus;
pub mod wire;

pub use bus::{EventBus, Subscription, SubscriptionHandle};
pub use delivery::Delivery;
pub use event::Event;
pub use fact::{
    Announce, Fact, FactIdentity, FactKind, LineItemFact, OrderCompletedFact, OutboundFact,
    ProductAddedFact,
};
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use wire::CodecError;
