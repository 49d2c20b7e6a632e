use serde::{Deserialize, Serialize};

use meshsync_core::{AggregateRoot, DomainError, ProductId};

/// Local aggregate: InventoryItem, keyed by the catalog's product id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    product_id: ProductId,
    name: String,
    quantity: i64,
    version: u64,
}

/// Result of a stock change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub before: i64,
    pub after: i64,
}

impl StockChange {
    /// More stock left the warehouse than it held.
    pub fn oversold(&self) -> bool {
        self.after < 0
    }
}

impl InventoryItem {
    /// A freshly known product starts with zero stock.
    pub fn new(product_id: ProductId, name: impl Into<String>) -> Self {
        Self {
            product_id,
            name: name.into(),
            quantity: 0,
            version: 0,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Stock left the warehouse because an order completed.
    ///
    /// The order already happened in another service, so this never refuses
    /// on insufficient stock; callers check [`StockChange::oversold`].
    pub fn decrease(&mut self, amount: u64) -> Result<StockChange, DomainError> {
        let amount = i64::try_from(amount)
            .map_err(|_| DomainError::validation(format!("quantity {amount} out of range")))?;
        let before = self.quantity;
        let after = before
            .checked_sub(amount)
            .ok_or_else(|| DomainError::invariant("stock underflow"))?;
        self.quantity = after;
        self.version += 1;
        Ok(StockChange { before, after })
    }
}

impl AggregateRoot for InventoryItem {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
