use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use meshsync_core::{AggregateRoot, ProductId};

/// Local aggregate: what the orders service knows about a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    product_number: ProductId,
    description: String,
    price: Option<Decimal>,
    version: u64,
}

impl ProductInfo {
    pub fn new(product_number: ProductId, description: impl Into<String>, price: Option<Decimal>) -> Self {
        Self {
            product_number,
            description: description.into(),
            price,
            version: 0,
        }
    }

    pub fn product_number(&self) -> ProductId {
        self.product_number
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn price(&self) -> Option<Decimal> {
        self.price
    }

    /// Replace description and price with the latest values seen.
    ///
    /// Returns `false` when nothing changed.
    pub fn overwrite(&mut self, description: impl Into<String>, price: Option<Decimal>) -> bool {
        let description = description.into();
        if self.description == description && self.price == price {
            return false;
        }
        self.description = description;
        self.price = price;
        self.version += 1;
        true
    }
}

impl AggregateRoot for ProductInfo {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_number
    }

    fn version(&self) -> u64 {
        self.version
    }
}
