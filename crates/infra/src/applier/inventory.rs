use tracing::{debug, info, warn};

use meshsync_core::DomainError;
use meshsync_events::{Fact, FactIdentity, OrderCompletedFact, ProductAddedFact};
use meshsync_inventory::InventoryItem;

use crate::aggregate_store::{AggregateStore, Applied, Mutation, apply_with};

use super::error::ApplyError;
use super::processed::{Claim, ProcessedFactLog};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProductAddedOutcome {
    Created,
    AlreadyPresent,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OrderCompletedOutcome {
    /// `lines` counts the line items applied by this call.
    Updated { lines: usize },
    AlreadyApplied,
}

/// Inventory side: keeps `InventoryItem`s in step with catalog and order facts.
pub struct InventoryApplier<S, L> {
    store: S,
    processed: L,
    max_attempts: u32,
}

impl<S, L> InventoryApplier<S, L>
where
    S: AggregateStore<InventoryItem>,
    L: ProcessedFactLog,
{
    pub fn new(store: S, processed: L, max_attempts: u32) -> Self {
        Self {
            store,
            processed,
            max_attempts,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Make the product known locally, with zero stock.
    pub fn apply_product_added(
        &self,
        fact: &ProductAddedFact,
    ) -> Result<ProductAddedOutcome, ApplyError> {
        let applied = apply_with(
            &self.store,
            &fact.product_id,
            || Ok(Some(InventoryItem::new(fact.product_id, fact.name.clone()))),
            |_| Ok(Mutation::Unchanged),
            self.max_attempts,
        )?;

        match applied {
            Applied::Created(_) => {
                info!(fact = %fact.identity(), product_id = %fact.product_id, name = %fact.name, "product added to inventory");
                Ok(ProductAddedOutcome::Created)
            }
            _ => {
                info!(fact = %fact.identity(), product_id = %fact.product_id, "product already available in inventory");
                Ok(ProductAddedOutcome::AlreadyPresent)
            }
        }
    }

    /// Take the order's line items out of stock, once per order.
    pub fn apply_order_completed(
        &self,
        fact: &OrderCompletedFact,
    ) -> Result<OrderCompletedOutcome, ApplyError> {
        let identity = fact.identity();

        match self.processed.claim(&identity) {
            Claim::Claimed => {}
            Claim::AlreadyProcessed => {
                info!(fact = %identity, order_id = %fact.order_id, "order already applied; skipping");
                return Ok(OrderCompletedOutcome::AlreadyApplied);
            }
            Claim::InFlight => return Err(ApplyError::InFlight(identity)),
        }

        let result = self.apply_lines(fact);
        match &result {
            Ok(_) => self.processed.complete(&identity),
            Err(_) => self.processed.release(&identity),
        }
        result
    }

    fn apply_lines(&self, fact: &OrderCompletedFact) -> Result<OrderCompletedOutcome, ApplyError> {
        // Every product must be known before any stock moves.
        for (index, line) in fact.line_items.iter().enumerate() {
            let line_identity = FactIdentity::order_line(fact.order_id, index);
            if self.processed.is_processed(&line_identity) {
                continue;
            }
            if self.store.load(&line.product_number)?.is_none() {
                return Err(ApplyError::UnknownProduct(line.product_number));
            }
        }

        let mut applied = 0;
        for (index, line) in fact.line_items.iter().enumerate() {
            let line_identity = FactIdentity::order_line(fact.order_id, index);
            if self.processed.is_processed(&line_identity) {
                debug!(fact = %line_identity, "line already applied");
                continue;
            }

            let outcome = apply_with(
                &self.store,
                &line.product_number,
                || Ok(None),
                |item| {
                    let mut next = item.clone();
                    next.decrease(line.quantity)?;
                    Ok::<_, DomainError>(Mutation::Changed(next))
                },
                self.max_attempts,
            )?;

            let item = match outcome {
                Applied::Updated(item) => item,
                _ => return Err(ApplyError::UnknownProduct(line.product_number)),
            };

            self.processed.complete(&line_identity);
            applied += 1;

            if item.quantity() < 0 {
                warn!(
                    fact = %line_identity,
                    order_id = %fact.order_id,
                    product_id = %line.product_number,
                    quantity = item.quantity(),
                    "stock oversold"
                );
            } else {
                debug!(fact = %line_identity, product_id = %line.product_number, quantity = item.quantity(), "stock decreased");
            }
        }

        info!(fact = %fact.identity(), order_id = %fact.order_id, lines = applied, "order applied to inventory");
        Ok(OrderCompletedOutcome::Updated { lines: applied })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate_store::InMemoryAggregateStore;
    use crate::applier::InMemoryProcessedFacts;
    use meshsync_core::{ExpectedVersion, OrderId, ProductId};
    use meshsync_events::LineItemFact;
    use std::sync::Arc;

    type Store = Arc<InMemoryAggregateStore<InventoryItem>>;

    fn applier() -> (InventoryApplier<Store, InMemoryProcessedFacts>, Store) {
        let store: Store = Arc::new(InMemoryAggregateStore::new());
        (
            InventoryApplier::new(store.clone(), InMemoryProcessedFacts::new(128), 5),
            store,
        )
    }

    fn product(id: ProductId, name: &str) -> ProductAddedFact {
        ProductAddedFact {
            product_id: id,
            name: name.to_string(),
            price: None,
        }
    }

    fn order(id: OrderId, lines: &[(ProductId, u64)]) -> OrderCompletedFact {
        OrderCompletedFact {
            order_id: id,
            line_items: lines
                .iter()
                .map(|(p, q)| LineItemFact {
                    product_number: *p,
                    quantity: *q,
                })
                .collect(),
        }
    }

    fn quantity(store: &Store, id: ProductId) -> i64 {
        store.load(&id).unwrap().unwrap().value.quantity()
    }

    #[test]
    fn product_added_is_idempotent() {
        let (applier, store) = applier();
        let p1 = ProductId::new();

        assert_eq!(
            applier.apply_product_added(&product(p1, "Widget")).unwrap(),
            ProductAddedOutcome::Created
        );
        assert_eq!(
            applier.apply_product_added(&product(p1, "Renamed")).unwrap(),
            ProductAddedOutcome::AlreadyPresent
        );

        let stored = store.load(&p1).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.value.name(), "Widget");
        assert_eq!(stored.value.quantity(), 0);
    }

    #[test]
    fn order_completed_twice_decrements_once() {
        let (applier, store) = applier();
        let p1 = ProductId::new();
        applier.apply_product_added(&product(p1, "Widget")).unwrap();
        let o1 = order(OrderId::new(), &[(p1, 3)]);

        assert_eq!(
            applier.apply_order_completed(&o1).unwrap(),
            OrderCompletedOutcome::Updated { lines: 1 }
        );
        assert_eq!(
            applier.apply_order_completed(&o1).unwrap(),
            OrderCompletedOutcome::AlreadyApplied
        );
        assert_eq!(quantity(&store, p1), -3);
    }

    #[test]
    fn unknown_product_blocks_every_line() {
        let (applier, store) = applier();
        let known = ProductId::new();
        let unknown = ProductId::new();
        applier.apply_product_added(&product(known, "Widget")).unwrap();
        let o1 = order(OrderId::new(), &[(known, 2), (unknown, 1)]);

        let err = applier.apply_order_completed(&o1).unwrap_err();
        assert_eq!(err, ApplyError::UnknownProduct(unknown));
        assert!(err.is_transient());
        assert_eq!(quantity(&store, known), 0);

        // Once the product shows up, redelivery applies the whole order.
        applier.apply_product_added(&product(unknown, "Gadget")).unwrap();
        assert_eq!(
            applier.apply_order_completed(&o1).unwrap(),
            OrderCompletedOutcome::Updated { lines: 2 }
        );
        assert_eq!(quantity(&store, known), -2);
        assert_eq!(quantity(&store, unknown), -1);
    }

    #[test]
    fn retry_after_partial_failure_applies_only_remaining_lines() {
        let processed = Arc::new(InMemoryProcessedFacts::new(128));
        let store: Store = Arc::new(InMemoryAggregateStore::new());
        let applier = InventoryApplier::new(store.clone(), processed.clone(), 5);
        let (p1, p2) = (ProductId::new(), ProductId::new());
        applier.apply_product_added(&product(p1, "a")).unwrap();
        applier.apply_product_added(&product(p2, "b")).unwrap();
        let o1 = order(OrderId::new(), &[(p1, 1), (p2, 4)]);

        // First line landed before a crash.
        let mut item = store.load(&p1).unwrap().unwrap();
        item.value.decrease(1).unwrap();
        store.save(item.value, ExpectedVersion::Exact(item.revision)).unwrap();
        processed.complete(&FactIdentity::order_line(o1.order_id, 0));

        assert_eq!(
            applier.apply_order_completed(&o1).unwrap(),
            OrderCompletedOutcome::Updated { lines: 1 }
        );
        assert_eq!(quantity(&store, p1), -1);
        assert_eq!(quantity(&store, p2), -4);
    }

    #[test]
    fn claimed_order_is_in_flight_for_others() {
        let processed = Arc::new(InMemoryProcessedFacts::new(128));
        let applier = InventoryApplier::new(
            Arc::new(InMemoryAggregateStore::<InventoryItem>::new()),
            processed.clone(),
            5,
        );
        let o1 = order(OrderId::new(), &[]);
        assert_eq!(processed.claim(&o1.identity()), Claim::Claimed);

        assert_eq!(
            applier.apply_order_completed(&o1).unwrap_err(),
            ApplyError::InFlight(o1.identity())
        );
    }

    #[test]
    fn concurrent_orders_on_one_product_all_land() {
        let (applier, store) = applier();
        let applier = Arc::new(applier);
        let p1 = ProductId::new();
        applier.apply_product_added(&product(p1, "Widget")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let applier = applier.clone();
                std::thread::spawn(move || {
                    let fact = order(OrderId::new(), &[(p1, 1)]);
                    loop {
                        match applier.apply_order_completed(&fact) {
                            Ok(_) => break,
                            Err(ApplyError::Conflict { .. }) => continue,
                            Err(other) => panic!("unexpected: {other}"),
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(quantity(&store, p1), -8);
    }
}
