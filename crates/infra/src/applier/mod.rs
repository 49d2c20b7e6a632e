//! Idempotent application of partner facts to local aggregates.
//!
//! Facts arrive at least once and in no guaranteed order. Appliers make
//! repeated delivery harmless:
//!
//! - `ProductAdded` is a create-if-absent on the product's natural key.
//! - `OrderCompleted` is not naturally idempotent (it decrements stock), so
//!   its effects are deduplicated by fact identity through a
//!   [`ProcessedFactLog`].

pub mod error;
pub mod inventory;
pub mod processed;
pub mod product_info;

pub use error::ApplyError;
pub use inventory::{InventoryApplier, OrderCompletedOutcome, ProductAddedOutcome};
pub use processed::{Claim, InMemoryProcessedFacts, ProcessedFactLog};
pub use product_info::{ProductInfoApplier, Upserted};
