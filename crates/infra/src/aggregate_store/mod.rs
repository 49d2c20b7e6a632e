//! Versioned storage for local aggregates.
//!
//! Local aggregates (inventory items, product info) are plain state records,
//! not event streams. The store keeps the latest value under its natural key
//! together with a store-assigned revision, and refuses writes whose
//! [`ExpectedVersion`](meshsync_core::ExpectedVersion) does not match.

pub mod apply;
pub mod in_memory;
pub mod r#trait;

pub use apply::{Applied, Mutation, UpsertError, apply_with};
pub use in_memory::InMemoryAggregateStore;
pub use r#trait::{AggregateStore, StoreError, Versioned};
