//! JSON wire shapes of facts.
//!
//! ```text
//! ProductAdded:   {"product": {"id": UUID, "name": string, "price"?: decimal}}
//! OrderCompleted: {"order": {"id": UUID, "lineItems": [{"productNumber": UUID, "quantity": integer}]}}
//! ```
//!
//! Unknown fields are ignored so polled items (which also carry
//! `publicationDate`) decode with the same functions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use meshsync_core::{OrderId, ProductId};

use crate::fact::{LineItemFact, OrderCompletedFact, ProductAddedFact};

/// Codec failure. Decoding failures are permanent: the same bytes will never
/// decode on a later attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("invalid fact: {0}")]
    Invalid(String),

    #[error("unknown fact kind: {0}")]
    UnknownKind(String),

    #[error("failed to encode fact: {0}")]
    Encode(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct ProductAddedWire {
    product: ProductBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProductBody {
    id: ProductId,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    price: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderCompletedWire {
    order: OrderBody,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody {
    id: OrderId,
    line_items: Vec<LineItemBody>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineItemBody {
    product_number: ProductId,
    quantity: u64,
}

impl From<ProductAddedWire> for ProductAddedFact {
    fn from(w: ProductAddedWire) -> Self {
        Self {
            product_id: w.product.id,
            name: w.product.name,
            price: w.product.price,
        }
    }
}

impl From<OrderCompletedWire> for OrderCompletedFact {
    fn from(w: OrderCompletedWire) -> Self {
        Self {
            order_id: w.order.id,
            line_items: w
                .order
                .line_items
                .into_iter()
                .map(|li| LineItemFact {
                    product_number: li.product_number,
                    quantity: li.quantity,
                })
                .collect(),
        }
    }
}

fn validate_product(fact: ProductAddedFact) -> Result<ProductAddedFact, CodecError> {
    if let Some(price) = fact.price {
        if price.is_sign_negative() {
            return Err(CodecError::Invalid(format!(
                "product {} has negative price {price}",
                fact.product_id
            )));
        }
    }
    Ok(fact)
}

pub fn decode_product_added(raw: &str) -> Result<ProductAddedFact, CodecError> {
    let wire: ProductAddedWire =
        serde_json::from_str(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;
    validate_product(wire.into())
}

pub fn product_added_from_value(value: &serde_json::Value) -> Result<ProductAddedFact, CodecError> {
    let wire = ProductAddedWire::deserialize(value).map_err(|e| CodecError::Malformed(e.to_string()))?;
    validate_product(wire.into())
}

pub fn decode_order_completed(raw: &str) -> Result<OrderCompletedFact, CodecError> {
    let wire: OrderCompletedWire =
        serde_json::from_str(raw).map_err(|e| CodecError::Malformed(e.to_string()))?;
    Ok(wire.into())
}

pub fn order_completed_from_value(value: &serde_json::Value) -> Result<OrderCompletedFact, CodecError> {
    let wire =
        OrderCompletedWire::deserialize(value).map_err(|e| CodecError::Malformed(e.to_string()))?;
    Ok(wire.into())
}

pub fn encode_product_added(fact: &ProductAddedFact) -> Result<String, CodecError> {
    let wire = ProductAddedWire {
        product: ProductBody {
            id: fact.product_id,
            name: fact.name.clone(),
            price: fact.price,
        },
    };
    serde_json::to_string(&wire).map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn encode_order_completed(fact: &OrderCompletedFact) -> Result<String, CodecError> {
    let wire = OrderCompletedWire {
        order: OrderBody {
            id: fact.order_id,
            line_items: fact
                .line_items
                .iter()
                .map(|li| LineItemBody {
                    product_number: li.product_number,
                    quantity: li.quantity,
                })
                .collect(),
        },
    };
    serde_json::to_string(&wire).map_err(|e| CodecError::Encode(e.to_string()))
}
