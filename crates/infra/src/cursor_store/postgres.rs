//! Postgres-backed cursor store.
//!
//! ```sql
//! CREATE TABLE integration_cursors (
//!     partner_id  TEXT PRIMARY KEY,
//!     last_update TIMESTAMPTZ NULL,
//!     updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! The upsert keeps `GREATEST(existing, new)`; Postgres' `GREATEST` ignores
//! NULLs, so an absent watermark never overwrites a present one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use meshsync_core::PartnerId;

use super::{CursorStore, CursorStoreError, Integration};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS integration_cursors (
    partner_id  TEXT PRIMARY KEY,
    last_update TIMESTAMPTZ NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and make sure the cursor table exists.
    pub async fn connect(database_url: &str) -> Result<Self, CursorStoreError> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), CursorStoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    #[instrument(skip(self), fields(partner = %partner_id))]
    async fn load(&self, partner_id: &PartnerId) -> Result<Option<Integration>, CursorStoreError> {
        let row = sqlx::query(
            r#"
            SELECT last_update
            FROM integration_cursors
            WHERE partner_id = $1
            "#,
        )
        .bind(partner_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let last_update: Option<DateTime<Utc>> = row.try_get("last_update")?;

        Ok(Some(match last_update {
            Some(at) => Integration::with_last_update(partner_id.clone(), at),
            None => Integration::new(partner_id.clone()),
        }))
    }

    #[instrument(skip(self, integration), fields(partner = %integration.partner_id()))]
    async fn save(&self, integration: &Integration) -> Result<(), CursorStoreError> {
        sqlx::query(
            r#"
            INSERT INTO integration_cursors (partner_id, last_update, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (partner_id)
            DO UPDATE SET
                last_update = GREATEST(integration_cursors.last_update, EXCLUDED.last_update),
                updated_at = NOW()
            "#,
        )
        .bind(integration.partner_id().as_str())
        .bind(integration.last_update())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
