use std::sync::Arc;

use thiserror::Error;

use meshsync_core::{AggregateRoot, ExpectedVersion};

/// A stored aggregate and the revision it was stored at.
///
/// Revisions are assigned by the store: the first write lands at 1 and every
/// later write increments by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<V> {
    pub value: V,
    pub revision: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Someone else wrote the record since it was loaded.
    #[error("optimistic concurrency check failed (expected {expected:?}, actual {actual:?})")]
    Conflict {
        expected: ExpectedVersion,
        actual: Option<u64>,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed, versioned storage for one aggregate type.
pub trait AggregateStore<V: AggregateRoot>: Send + Sync {
    fn load(&self, key: &V::Id) -> Result<Option<Versioned<V>>, StoreError>;

    /// Store `value` under `value.id()`, returning the new revision.
    fn save(&self, value: V, expected: ExpectedVersion) -> Result<u64, StoreError>;

    fn list(&self) -> Result<Vec<V>, StoreError>;
}

impl<V, S> AggregateStore<V> for Arc<S>
where
    V: AggregateRoot,
    S: AggregateStore<V> + ?Sized,
{
    fn load(&self, key: &V::Id) -> Result<Option<Versioned<V>>, StoreError> {
        (**self).load(key)
    }

    fn save(&self, value: V, expected: ExpectedVersion) -> Result<u64, StoreError> {
        (**self).save(value, expected)
    }

    fn list(&self) -> Result<Vec<V>, StoreError> {
        (**self).list()
    }
}
