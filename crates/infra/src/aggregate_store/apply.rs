//! Optimistic read-modify-write over an [`AggregateStore`].

use thiserror::Error;
use tracing::debug;

use meshsync_core::{AggregateRoot, DomainError, ExpectedVersion};

use super::r#trait::{AggregateStore, StoreError, Versioned};

/// What a mutator decided for an existing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<V> {
    Unchanged,
    Changed(V),
}

/// Outcome of [`apply_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied<V> {
    Created(V),
    Updated(V),
    /// The record existed and the mutator left it alone.
    Unchanged(V),
    /// No record existed and the factory declined to create one.
    Absent,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpsertError {
    #[error("gave up after {attempts} conflicting writes")]
    Exhausted { attempts: u32 },

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Domain(DomainError),
}

/// Create-or-mutate the record under `key`.
///
/// - absent: `factory()` returns `Some(value)` to create it, `None` to leave it absent
/// - present: `mutator(&value)` returns [`Mutation::Changed`] or [`Mutation::Unchanged`]
///
/// The write is conditional on the revision that was loaded. A conflict
/// reloads and re-runs the closures, up to `max_attempts` times in total.
pub fn apply_with<V, S, F, M>(
    store: &S,
    key: &V::Id,
    mut factory: F,
    mut mutator: M,
    max_attempts: u32,
) -> Result<Applied<V>, UpsertError>
where
    V: AggregateRoot + Clone,
    S: AggregateStore<V> + ?Sized,
    F: FnMut() -> Result<Option<V>, DomainError>,
    M: FnMut(&V) -> Result<Mutation<V>, DomainError>,
{
    let attempts = max_attempts.max(1);

    for attempt in 1..=attempts {
        let (candidate, expected, created) = match store.load(key).map_err(UpsertError::Store)? {
            None => match factory().map_err(UpsertError::Domain)? {
                None => return Ok(Applied::Absent),
                Some(value) => (value, ExpectedVersion::Absent, true),
            },
            Some(Versioned { value, revision }) => {
                match mutator(&value).map_err(UpsertError::Domain)? {
                    Mutation::Unchanged => return Ok(Applied::Unchanged(value)),
                    Mutation::Changed(next) => (next, ExpectedVersion::Exact(revision), false),
                }
            }
        };

        if candidate.id() != key {
            return Err(UpsertError::Domain(DomainError::invariant(format!(
                "record for {key:?} changed its key to {:?}",
                candidate.id()
            ))));
        }

        match store.save(candidate.clone(), expected) {
            Ok(_) if created => return Ok(Applied::Created(candidate)),
            Ok(_) => return Ok(Applied::Updated(candidate)),
            Err(StoreError::Conflict { expected, actual }) => {
                debug!(key = ?key, attempt, ?expected, ?actual, "concurrent write detected; retrying");
            }
            Err(err) => return Err(UpsertError::Store(err)),
        }
    }

    Err(UpsertError::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::aggregate_store::InMemoryAggregateStore;
    use meshsync_core::ProductId;
    use meshsync_inventory::InventoryItem;

    /// Loses the first `conflicts` saves to a simulated concurrent writer.
    struct Contended {
        inner: InMemoryAggregateStore<InventoryItem>,
        conflicts: AtomicU32,
    }

    impl AggregateStore<InventoryItem> for Contended {
        fn load(&self, key: &ProductId) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
            self.inner.load(key)
        }

        fn save(&self, value: InventoryItem, expected: ExpectedVersion) -> Result<u64, StoreError> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                // The rival writer bumps the record by one unit.
                if let Some(current) = self.inner.load(value.id())? {
                    let mut rival = current.value;
                    rival.decrease(1).map_err(|e| StoreError::Unavailable(e.to_string()))?;
                    self.inner.save(rival, ExpectedVersion::Exact(current.revision))?;
                }
                return Err(StoreError::Conflict {
                    expected,
                    actual: None,
                });
            }
            self.inner.save(value, expected)
        }

        fn list(&self) -> Result<Vec<InventoryItem>, StoreError> {
            self.inner.list()
        }
    }

    fn seeded(conflicts: u32) -> (Contended, ProductId) {
        let store = Contended {
            inner: InMemoryAggregateStore::new(),
            conflicts: AtomicU32::new(0),
        };
        let id = ProductId::new();
        store
            .save(InventoryItem::new(id, "Widget"), ExpectedVersion::Absent)
            .unwrap();
        store.conflicts.store(conflicts, Ordering::SeqCst);
        (store, id)
    }

    fn decrease_by(amount: u64) -> impl FnMut(&InventoryItem) -> Result<Mutation<InventoryItem>, DomainError> {
        move |item| {
            let mut next = item.clone();
            next.decrease(amount)?;
            Ok(Mutation::Changed(next))
        }
    }

    #[test]
    fn absent_record_is_created_by_factory() {
        let store = InMemoryAggregateStore::<InventoryItem>::new();
        let id = ProductId::new();

        let applied = apply_with(
            &store,
            &id,
            || Ok(Some(InventoryItem::new(id, "Widget"))),
            |_| Ok(Mutation::Unchanged),
            3,
        )
        .unwrap();

        assert!(matches!(applied, Applied::Created(item) if item.quantity() == 0));
        assert_eq!(store.load(&id).unwrap().unwrap().revision, 1);
    }

    #[test]
    fn factory_may_decline_creation() {
        let store = InMemoryAggregateStore::<InventoryItem>::new();
        let id = ProductId::new();

        let applied = apply_with(&store, &id, || Ok(None), decrease_by(1), 3).unwrap();

        assert_eq!(applied, Applied::Absent);
        assert!(store.load(&id).unwrap().is_none());
    }

    #[test]
    fn unchanged_mutation_does_not_write() {
        let (store, id) = seeded(0);

        let applied = apply_with(&store, &id, || Ok(None), |_| Ok(Mutation::Unchanged), 3).unwrap();

        assert!(matches!(applied, Applied::Unchanged(_)));
        assert_eq!(store.load(&id).unwrap().unwrap().revision, 1);
    }

    #[test]
    fn conflict_retry_converges_on_latest_state() {
        let (store, id) = seeded(2);

        let applied = apply_with(&store, &id, || Ok(None), decrease_by(3), 5).unwrap();

        // Two rival decrements of 1 plus ours.
        assert!(matches!(applied, Applied::Updated(item) if item.quantity() == -5));
        assert_eq!(store.load(&id).unwrap().unwrap().value.quantity(), -5);
    }

    #[test]
    fn exhausting_attempts_reports_conflict() {
        let (store, id) = seeded(10);

        let err = apply_with(&store, &id, || Ok(None), decrease_by(3), 3).unwrap_err();

        assert_eq!(err, UpsertError::Exhausted { attempts: 3 });
    }

    #[test]
    fn domain_errors_are_not_retried() {
        let (store, id) = seeded(0);
        let mut calls = 0;

        let err = apply_with(
            &store,
            &id,
            || Ok(None),
            |_| {
                calls += 1;
                Err(DomainError::validation("nope"))
            },
            5,
        )
        .unwrap_err();

        assert!(matches!(err, UpsertError::Domain(_)));
        assert_eq!(calls, 1);
    }
}
