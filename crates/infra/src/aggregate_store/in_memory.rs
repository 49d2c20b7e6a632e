use std::collections::HashMap;
use std::sync::RwLock;

use meshsync_core::{AggregateRoot, ExpectedVersion};

use super::r#trait::{AggregateStore, StoreError, Versioned};

/// In-memory aggregate store.
///
/// The version check and the write happen under one write lock, so two
/// concurrent read-modify-write cycles on the same key cannot both succeed.
#[derive(Debug)]
pub struct InMemoryAggregateStore<V: AggregateRoot> {
    records: RwLock<HashMap<V::Id, Versioned<V>>>,
}

impl<V: AggregateRoot> InMemoryAggregateStore<V> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: AggregateRoot> Default for InMemoryAggregateStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> AggregateStore<V> for InMemoryAggregateStore<V>
where
    V: AggregateRoot + Clone + Send + Sync,
    V::Id: Send + Sync,
{
    fn load(&self, key: &V::Id) -> Result<Option<Versioned<V>>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(records.get(key).cloned())
    }

    fn save(&self, value: V, expected: ExpectedVersion) -> Result<u64, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;

        let actual = records.get(value.id()).map(|r| r.revision);
        if !expected.matches(actual) {
            return Err(StoreError::Conflict { expected, actual });
        }

        let revision = actual.unwrap_or(0) + 1;
        records.insert(value.id().clone(), Versioned { value, revision });
        Ok(revision)
    }

    fn list(&self) -> Result<Vec<V>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(records.values().map(|r| r.value.clone()).collect())
    }
}
