//! Per-partner polling watermarks.
//!
//! An [`Integration`] remembers the newest `publicationDate` applied from a
//! partner. The watermark only moves forward, and only after a whole batch
//! has been applied.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use meshsync_core::PartnerId;

pub use in_memory::InMemoryCursorStore;
pub use postgres::PostgresCursorStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    partner_id: PartnerId,
    last_update: Option<DateTime<Utc>>,
}

impl Integration {
    pub fn new(partner_id: PartnerId) -> Self {
        Self {
            partner_id,
            last_update: None,
        }
    }

    pub fn with_last_update(partner_id: PartnerId, last_update: DateTime<Utc>) -> Self {
        Self {
            partner_id,
            last_update: Some(last_update),
        }
    }

    pub fn partner_id(&self) -> &PartnerId {
        &self.partner_id
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// The same integration with its watermark at `publication_date`,
    /// unless it is already later.
    pub fn advanced_to(&self, publication_date: DateTime<Utc>) -> Self {
        let last_update = match self.last_update {
            Some(current) if current >= publication_date => current,
            _ => publication_date,
        };
        Self {
            partner_id: self.partner_id.clone(),
            last_update: Some(last_update),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorStoreError {
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for CursorStoreError {
    fn from(err: sqlx::Error) -> Self {
        CursorStoreError::Database(err.to_string())
    }
}

/// Persistence for [`Integration`] records.
///
/// `save` must never move a stored watermark backwards, whatever it is given.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, partner_id: &PartnerId) -> Result<Option<Integration>, CursorStoreError>;

    async fn save(&self, integration: &Integration) -> Result<(), CursorStoreError>;
}

#[async_trait]
impl<S> CursorStore for Arc<S>
where
    S: CursorStore + ?Sized,
{
    async fn load(&self, partner_id: &PartnerId) -> Result<Option<Integration>, CursorStoreError> {
        (**self).load(partner_id).await
    }

    async fn save(&self, integration: &Integration) -> Result<(), CursorStoreError> {
        (**self).save(integration).await
    }
}
