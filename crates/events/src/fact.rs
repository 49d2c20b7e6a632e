//! Facts exchanged between services.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use meshsync_core::{OrderId, ProductId};

use crate::wire::{self, CodecError};

/// The kinds of fact this engine understands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FactKind {
    ProductAdded,
    OrderCompleted,
}

impl FactKind {
    /// Stable name, also used as the `type` parameter of remote event queries.
    pub fn as_str(self) -> &'static str {
        match self {
            FactKind::ProductAdded => "productAdded",
            FactKind::OrderCompleted => "orderCompleted",
        }
    }

    /// Broker topic the kind is published on unless configured otherwise.
    pub fn default_topic(self) -> &'static str {
        match self {
            FactKind::ProductAdded => "products",
            FactKind::OrderCompleted => "orders",
        }
    }
}

impl core::fmt::Display for FactKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "productAdded" => Ok(FactKind::ProductAdded),
            "orderCompleted" => Ok(FactKind::OrderCompleted),
            other => Err(CodecError::UnknownKind(other.to_string())),
        }
    }
}

/// Identity of a fact (or of one effect of a fact) for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactIdentity(String);

impl FactIdentity {
    pub fn product(id: ProductId) -> Self {
        Self(format!("product:{id}"))
    }

    pub fn order(id: OrderId) -> Self {
        Self(format!("order:{id}"))
    }

    /// One line item of an order, applied independently of its siblings.
    pub fn order_line(id: OrderId, index: usize) -> Self {
        Self(format!("order:{id}#{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for FactIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fact received from (or sent to) a partner service.
pub trait Fact: Clone + core::fmt::Debug + Send + Sync + 'static {
    const KIND: FactKind;

    fn identity(&self) -> FactIdentity;

    /// Decode a raw UTF-8 broker payload.
    fn decode(raw: &str) -> Result<Self, CodecError>;

    /// Decode from an already parsed JSON document (e.g. a polled item).
    fn decode_value(value: &serde_json::Value) -> Result<Self, CodecError>;

    fn encode(&self) -> Result<String, CodecError>;
}

/// A product was added to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductAddedFact {
    pub product_id: ProductId,
    pub name: String,
    pub price: Option<Decimal>,
}

/// An order was completed; stock for its line items left the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCompletedFact {
    pub order_id: OrderId,
    pub line_items: Vec<LineItemFact>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LineItemFact {
    pub product_number: ProductId,
    pub quantity: u64,
}

impl Fact for ProductAddedFact {
    const KIND: FactKind = FactKind::ProductAdded;

    fn identity(&self) -> FactIdentity {
        FactIdentity::product(self.product_id)
    }

    fn decode(raw: &str) -> Result<Self, CodecError> {
        wire::decode_product_added(raw)
    }

    fn decode_value(value: &serde_json::Value) -> Result<Self, CodecError> {
        wire::product_added_from_value(value)
    }

    fn encode(&self) -> Result<String, CodecError> {
        wire::encode_product_added(self)
    }
}

impl Fact for OrderCompletedFact {
    const KIND: FactKind = FactKind::OrderCompleted;

    fn identity(&self) -> FactIdentity {
        FactIdentity::order(self.order_id)
    }

    fn decode(raw: &str) -> Result<Self, CodecError> {
        wire::decode_order_completed(raw)
    }

    fn decode_value(value: &serde_json::Value) -> Result<Self, CodecError> {
        wire::order_completed_from_value(value)
    }

    fn encode(&self) -> Result<String, CodecError> {
        wire::encode_order_completed(self)
    }
}

/// A fact ready to be announced to partners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFact {
    ProductAdded(ProductAddedFact),
    OrderCompleted(OrderCompletedFact),
}

impl OutboundFact {
    pub fn kind(&self) -> FactKind {
        match self {
            OutboundFact::ProductAdded(_) => FactKind::ProductAdded,
            OutboundFact::OrderCompleted(_) => FactKind::OrderCompleted,
        }
    }

    pub fn identity(&self) -> FactIdentity {
        match self {
            OutboundFact::ProductAdded(f) => f.identity(),
            OutboundFact::OrderCompleted(f) => f.identity(),
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        match self {
            OutboundFact::ProductAdded(f) => f.encode(),
            OutboundFact::OrderCompleted(f) => f.encode(),
        }
    }
}

/// Local events that partners need to hear about.
///
/// Returns `None` for events that stay internal to the service.
pub trait Announce {
    fn announce(&self) -> Option<OutboundFact>;
}
