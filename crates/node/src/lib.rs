//! Inventory-side reconciliation node.
//!
//! Hosts the broker consumers for `ProductAdded` and `OrderCompleted` facts
//! and one poller per configured partner, all writing to the same
//! inventory store.

pub mod app;
