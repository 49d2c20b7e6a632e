use tracing::info;

use meshsync_events::{Fact, ProductAddedFact};
use meshsync_orders::ProductInfo;

use crate::aggregate_store::{AggregateStore, Applied, Mutation, apply_with};

use super::error::ApplyError;

/// Outcome of a last-write-wins upsert.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub created: bool,
    /// False when the stored record already carried the same values.
    pub changed: bool,
}

/// Orders side: keeps the local copy of catalog data current.
pub struct ProductInfoApplier<S> {
    store: S,
    max_attempts: u32,
}

impl<S> ProductInfoApplier<S>
where
    S: AggregateStore<ProductInfo>,
{
    pub fn new(store: S, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create or overwrite description and price. The incoming fact wins.
    pub fn apply_product_info(&self, fact: &ProductAddedFact) -> Result<Upserted, ApplyError> {
        let applied = apply_with(
            &self.store,
            &fact.product_id,
            || {
                Ok(Some(ProductInfo::new(
                    fact.product_id,
                    fact.name.clone(),
                    fact.price,
                )))
            },
            |existing| {
                let mut next = existing.clone();
                if next.overwrite(fact.name.clone(), fact.price) {
                    Ok(Mutation::Changed(next))
                } else {
                    Ok(Mutation::Unchanged)
                }
            },
            self.max_attempts,
        )?;

        let upserted = match applied {
            Applied::Created(_) => Upserted {
                created: true,
                changed: true,
            },
            Applied::Updated(_) => Upserted {
                created: false,
                changed: true,
            },
            Applied::Unchanged(_) | Applied::Absent => Upserted {
                created: false,
                changed: false,
            },
        };

        info!(
            fact = %fact.identity(),
            product_id = %fact.product_id,
            created = upserted.created,
            changed = upserted.changed,
            "product info upserted"
        );
        Ok(upserted)
    }
}
