//! Infrastructure layer: stores, appliers, transports and the two
//! reconciliation paths between services.
//!
//! - **Push**: [`consumer`] receives facts from the broker and applies them
//!   idempotently through the [`applier`]s.
//! - **Pull**: [`poller`] fetches a partner's [`remote`] event collection
//!   since the watermark kept in the [`cursor_store`].
//! - **Announce**: [`publisher`] sends this service's own facts after commit.

pub mod aggregate_store;
pub mod applier;
pub mod config;
pub mod consumer;
pub mod cursor_store;
pub mod event_bus;
pub mod poller;
pub mod publisher;
pub mod remote;

pub use aggregate_store::{
    AggregateStore, Applied, InMemoryAggregateStore, Mutation, StoreError, UpsertError,
    Versioned, apply_with,
};
pub use applier::{
    ApplyError, Claim, InMemoryProcessedFacts, InventoryApplier, OrderCompletedOutcome,
    ProcessedFactLog, ProductAddedOutcome, ProductInfoApplier, Upserted,
};
pub use config::{ConfigError, IntegrationConfig};
pub use consumer::{
    ConsumerFault, ConsumerWorker, ConsumerWorkerConfig, Disposition, EventConsumer, FaultKind,
    HandleError, HandlerRegistry, WorkerHandle,
};
pub use cursor_store::{
    CursorStore, CursorStoreError, InMemoryCursorStore, Integration, PostgresCursorStore,
};
pub use poller::{IncrementalPoller, PartnerLink, PollError, PollReport, PollState, PollerWorker};
pub use publisher::{OutboundPublisher, PublishError};
pub use remote::{EventPage, FetchError, HttpEventSource, RemoteEventSource, RemoteItem};

#[cfg(test)]
mod integration_tests;
