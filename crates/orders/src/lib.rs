//! Orders domain module.
//!
//! - [`Order`]: the orders service's own aggregate; completing it produces the
//!   `OrderCompleted` fact the inventory service consumes.
//! - [`ProductInfo`]: the orders service's local copy of catalog data, kept up
//!   to date from `ProductAdded` facts (last write wins).

pub mod order;
pub mod product_info;

pub use order::{
    AddLineItem, CompleteOrder, CreateOrder, LineItemAdded, Order, OrderCommand, OrderCompleted,
    OrderCreated, OrderEvent, OrderLine, OrderStatus,
};
pub use product_info::ProductInfo;
