//! Inventory domain module.
//!
//! The inventory service keeps one [`InventoryItem`] per product it has heard
//! about from the catalog, and reduces stock when orders complete elsewhere.
//! Pure domain logic (no IO, no broker, no storage).

pub mod item;

pub use item::{InventoryItem, StockChange};
