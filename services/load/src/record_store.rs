//! Destination store for parsed records.
//!
//! Records are keyed by `(file type, identity key)`. [`PostgresRecordStore`]
//! keeps them in a single `rif_records` table with the record body as JSONB.

use crate::config::DatabaseConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use rif_extract::{RifFileType, RifRecord};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors returned by a [`RecordStore`]
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence capability used by the loader
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_identity(
        &self,
        file_type: RifFileType,
        identity_key: &str,
    ) -> Result<Option<RifRecord>, StoreError>;

    async fn exists(&self, file_type: RifFileType, identity_key: &str) -> Result<bool, StoreError> {
        Ok(self.find_by_identity(file_type, identity_key).await?.is_some())
    }

    /// Insert the record, or overwrite the one stored under the same identity
    async fn persist(&self, record: &RifRecord) -> Result<(), StoreError>;

    async fn count(&self, file_type: RifFileType) -> Result<u64, StoreError>;
}

/// PostgreSQL-backed record store
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Create a new record store with its own connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self))]
    async fn find_by_identity(
        &self,
        file_type: RifFileType,
        identity_key: &str,
    ) -> Result<Option<RifRecord>, StoreError> {
        let row: Option<(Json<RifRecord>,)> = sqlx::query_as(
            r#"
            SELECT record FROM rif_records
            WHERE record_type = $1 AND identity_key = $2
            "#,
        )
        .bind(file_type.as_str())
        .bind(identity_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(Json(record),)| record))
    }

    async fn exists(&self, file_type: RifFileType, identity_key: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM rif_records
                WHERE record_type = $1 AND identity_key = $2
            )
            "#,
        )
        .bind(file_type.as_str())
        .bind(identity_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self, record), fields(file_type = %record.file_type(), identity_key = %record.identity_key()))]
    async fn persist(&self, record: &RifRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rif_records (
                record_type, identity_key, beneficiary_id, record, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, NOW(), NOW()
            )
            ON CONFLICT (record_type, identity_key) DO UPDATE SET
                beneficiary_id = EXCLUDED.beneficiary_id,
                record = EXCLUDED.record,
                updated_at = NOW()
            "#,
        )
        .bind(record.file_type().as_str())
        .bind(record.identity_key())
        .bind(record.beneficiary_id())
        .bind(Json(record))
        .execute(&self.pool)
        .await?;

        debug!("Record persisted");
        Ok(())
    }

    async fn count(&self, file_type: RifFileType) -> Result<u64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM rif_records WHERE record_type = $1")
                .bind(file_type.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }
}

/// Record store held in memory
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<(RifFileType, String), RifRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Ordered copy of the current contents
    pub fn snapshot(&self) -> BTreeMap<(RifFileType, String), RifRecord> {
        self.records
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_by_identity(
        &self,
        file_type: RifFileType,
        identity_key: &str,
    ) -> Result<Option<RifRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .get(&(file_type, identity_key.to_string()))
            .cloned())
    }

    async fn persist(&self, record: &RifRecord) -> Result<(), StoreError> {
        self.records.write().insert(
            (record.file_type(), record.identity_key().to_string()),
            record.clone(),
        );
        Ok(())
    }

    async fn count(&self, file_type: RifFileType) -> Result<u64, StoreError> {
        Ok(self
            .records
            .read()
            .keys()
            .filter(|(t, _)| *t == file_type)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use rif_extract::records::PartDEvent;
    use std::str::FromStr;

    fn pde(event_id: &str, total_cost: &str) -> RifRecord {
        RifRecord::Pde(PartDEvent {
            event_id: event_id.to_string(),
            beneficiary_id: "567834".to_string(),
            service_date: NaiveDate::from_ymd_opt(2015, 5, 12).unwrap(),
            product_service_id: "500904610".to_string(),
            quantity_dispensed: BigDecimal::from(60),
            days_supply: 30,
            total_cost: BigDecimal::from_str(total_cost).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_in_memory_persist_overwrites_by_identity() {
        let store = InMemoryRecordStore::new();

        assert!(!store.exists(RifFileType::Pde, "89").await.unwrap());
        store.persist(&pde("89", "362.84")).await.unwrap();
        assert!(store.exists(RifFileType::Pde, "89").await.unwrap());

        store.persist(&pde("89", "100.00")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.find_by_identity(RifFileType::Pde, "89").await.unwrap(),
            Some(pde("89", "100.00"))
        );
    }

    #[tokio::test]
    async fn test_in_memory_identity_is_scoped_by_type() {
        let store = InMemoryRecordStore::new();
        store.persist(&pde("89", "362.84")).await.unwrap();

        assert!(!store.exists(RifFileType::Carrier, "89").await.unwrap());
        assert_eq!(store.count(RifFileType::Pde).await.unwrap(), 1);
        assert_eq!(store.count(RifFileType::Carrier).await.unwrap(), 0);
    }
}
