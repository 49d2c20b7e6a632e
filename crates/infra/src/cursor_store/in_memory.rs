use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use meshsync_core::PartnerId;

use super::{CursorStore, CursorStoreError, Integration};

/// In-memory cursor store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    records: RwLock<HashMap<PartnerId, Integration>>,
    writes: AtomicU64,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-existing records, e.g. a watermark carried over from elsewhere.
    pub fn seeded(records: impl IntoIterator<Item = Integration>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.records.write() {
            for r in records {
                map.insert(r.partner_id().clone(), r);
            }
        }
        store
    }

    /// Number of successful `save` calls.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self, partner_id: &PartnerId) -> Result<Option<Integration>, CursorStoreError> {
        let map = self
            .records
            .read()
            .map_err(|_| CursorStoreError::Database("lock poisoned".to_string()))?;
        Ok(map.get(partner_id).cloned())
    }

    async fn save(&self, integration: &Integration) -> Result<(), CursorStoreError> {
        let mut map = self
            .records
            .write()
            .map_err(|_| CursorStoreError::Database("lock poisoned".to_string()))?;

        let merged = match (map.get(integration.partner_id()), integration.last_update()) {
            (Some(existing), Some(at)) => existing.advanced_to(at),
            (Some(existing), None) => existing.clone(),
            (None, _) => integration.clone(),
        };
        map.insert(merged.partner_id().clone(), merged);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
