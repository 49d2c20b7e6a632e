use thiserror::Error;

use meshsync_core::{DomainError, ProductId};
use meshsync_events::FactIdentity;

use crate::aggregate_store::{StoreError, UpsertError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("gave up after {attempts} conflicting writes")]
    Conflict { attempts: u32 },

    /// The product has not been announced to this service yet.
    #[error("product {0} is not known locally")]
    UnknownProduct(ProductId),

    #[error("{0} is being applied by another worker")]
    InFlight(FactIdentity),

    #[error(transparent)]
    Store(StoreError),

    #[error("fact rejected: {0}")]
    Domain(DomainError),
}

impl ApplyError {
    /// Transient failures may succeed on redelivery; permanent ones never will.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ApplyError::Domain(_))
    }
}

impl From<UpsertError> for ApplyError {
    fn from(err: UpsertError) -> Self {
        match err {
            UpsertError::Exhausted { attempts } => ApplyError::Conflict { attempts },
            UpsertError::Store(e) => ApplyError::Store(e),
            UpsertError::Domain(e) => ApplyError::Domain(e),
        }
    }
}

impl From<StoreError> for ApplyError {
    fn from(err: StoreError) -> Self {
        ApplyError::Store(err)
    }
}
