//! Postgres-backed rate store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pocketbook_common::{CurrencyCode, RateSnapshotId};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{FxError, FxResult};
use crate::snapshot::CachedRates;
use crate::store::RateStore;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS exchange_rate_cache (
    id UUID PRIMARY KEY,
    base_currency TEXT NOT NULL,
    rates JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)
"#;

#[derive(Debug, FromRow)]
struct CachedRatesRow {
    id: Uuid,
    base_currency: String,
    rates: Json<BTreeMap<String, f64>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CachedRatesRow> for CachedRates {
    type Error = FxError;

    fn try_from(row: CachedRatesRow) -> FxResult<Self> {
        let base_currency = CurrencyCode::parse(&row.base_currency)
            .map_err(|e| FxError::Store(format!("stored record {}: {e}", row.id)))?;
        Ok(CachedRates {
            id: RateSnapshotId::from_uuid(row.id),
            base_currency,
            rates: row.rates.0,
            updated_at: row.updated_at,
        })
    }
}

/// Rate store backed by the `exchange_rate_cache` table.
#[derive(Clone)]
pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    /// Create a store on an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    pub async fn connect(database_url: &str) -> FxResult<Self> {
        let pool = PgPool::connect(database_url).await.map_err(store_error)?;
        Ok(Self::new(pool))
    }

    /// Create the table if it does not exist.
    pub async fn migrate(&self) -> FxResult<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn load(&self) -> FxResult<Option<CachedRates>> {
        // Two rows are enough to detect a broken singleton.
        let mut rows = sqlx::query_as::<_, CachedRatesRow>(
            "SELECT id, base_currency, rates, updated_at FROM exchange_rate_cache LIMIT 2",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        if rows.len() > 1 {
            let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exchange_rate_cache")
                .fetch_one(&self.pool)
                .await
                .map_err(store_error)?;
            error!(records, "Rate cache table holds more than one record");
            return Err(FxError::StoreCorrupted {
                records: usize::try_from(records).unwrap_or(usize::MAX),
            });
        }

        rows.pop().map(CachedRates::try_from).transpose()
    }

    async fn insert(&self, rates: &CachedRates) -> FxResult<()> {
        // Inserts only into an empty table, in one statement.
        let result = sqlx::query(
            "INSERT INTO exchange_rate_cache (id, base_currency, rates, updated_at) \
             SELECT $1, $2, $3, $4 \
             WHERE NOT EXISTS (SELECT 1 FROM exchange_rate_cache)",
        )
        .bind(rates.id.as_uuid())
        .bind(rates.base_currency.code())
        .bind(Json(&rates.rates))
        .bind(rates.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(FxError::StoreConflict(format!(
                "insert of {} into a non-empty cache",
                rates.id
            )));
        }
        debug!(id = %rates.id, "Inserted cached rates");
        Ok(())
    }

    async fn replace(&self, rates: &CachedRates) -> FxResult<()> {
        let result = sqlx::query(
            "UPDATE exchange_rate_cache SET base_currency = $2, rates = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(rates.id.as_uuid())
        .bind(rates.base_currency.code())
        .bind(Json(&rates.rates))
        .bind(rates.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() != 1 {
            return Err(FxError::StoreConflict(format!("no record with id {}", rates.id)));
        }
        debug!(id = %rates.id, "Replaced cached rates");
        Ok(())
    }

    async fn upsert(&self, rates: &CachedRates) -> FxResult<()> {
        sqlx::query(
            "INSERT INTO exchange_rate_cache (id, base_currency, rates, updated_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET \
                base_currency = EXCLUDED.base_currency, \
                rates = EXCLUDED.rates, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(rates.id.as_uuid())
        .bind(rates.base_currency.code())
        .bind(Json(&rates.rates))
        .bind(rates.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        debug!(id = %rates.id, "Upserted cached rates");
        Ok(())
    }
}

fn store_error(e: sqlx::Error) -> FxError {
    FxError::Store(e.to_string())
}
