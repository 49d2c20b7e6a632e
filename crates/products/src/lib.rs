//! Catalog domain module.
//!
//! Adding a product to the catalog produces the `ProductAdded` fact that both
//! the inventory and the orders service consume.

pub mod product;

pub use product::{AddProduct, Product, ProductAdded, ProductCommand, ProductEvent, Reprice, ProductRepriced};
