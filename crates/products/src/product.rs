use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use meshsync_core::{Aggregate, AggregateRoot, DomainError, ProductId};
use meshsync_events::{Announce, Event, OutboundFact, ProductAddedFact};

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    name: String,
    price: Option<Decimal>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            price: None,
            version: 0,
            created: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Option<Decimal> {
        self.price
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddProduct {
    pub product_id: ProductId,
    pub name: String,
    pub price: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reprice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reprice {
    pub product_id: ProductId,
    pub price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    AddProduct(AddProduct),
    Reprice(Reprice),
}

/// Event: ProductAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAdded {
    pub product_id: ProductId,
    pub name: String,
    pub price: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductRepriced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRepriced {
    pub product_id: ProductId,
    pub price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductAdded(ProductAdded),
    ProductRepriced(ProductRepriced),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductAdded(_) => "catalog.product.added",
            ProductEvent::ProductRepriced(_) => "catalog.product.repriced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductAdded(e) => e.occurred_at,
            ProductEvent::ProductRepriced(e) => e.occurred_at,
        }
    }
}

impl Announce for ProductEvent {
    fn announce(&self) -> Option<OutboundFact> {
        match self {
            ProductEvent::ProductAdded(e) => Some(OutboundFact::ProductAdded(ProductAddedFact {
                product_id: e.product_id,
                name: e.name.clone(),
                price: e.price,
            })),
            // Partners only learn about products once; later price changes
            // stay local to the catalog.
            ProductEvent::ProductRepriced(_) => None,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductAdded(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.price = e.price;
                self.created = true;
            }
            ProductEvent::ProductRepriced(e) => {
                self.price = Some(e.price);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::AddProduct(cmd) => self.handle_add(cmd),
            ProductCommand::Reprice(cmd) => self.handle_reprice(cmd),
        }
    }
}

impl Product {
    fn validate_price(price: Decimal) -> Result<(), DomainError> {
        if price.is_sign_negative() {
            return Err(DomainError::validation("price cannot be negative"));
        }
        Ok(())
    }

    fn handle_add(&self, cmd: &AddProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if let Some(price) = cmd.price {
            Self::validate_price(price)?;
        }

        Ok(vec![ProductEvent::ProductAdded(ProductAdded {
            product_id: cmd.product_id,
            name: cmd.name.trim().to_string(),
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reprice(&self, cmd: &Reprice) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != cmd.product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Self::validate_price(cmd.price)?;

        Ok(vec![ProductEvent::ProductRepriced(ProductRepriced {
            product_id: cmd.product_id,
            price: cmd.price,
            occurred_at: cmd.occurred_at,
        })])
    }
}
