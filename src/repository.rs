//! Key record persistence
//!
//! The only persisted entity is the association between a public point
//! and the labels of its module-resident key objects. Records are
//! immutable once written; there is no update or delete.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::WalletError;

/// Public-point to key-label association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    /// Raw uncompressed EC point, hex encoded. Unique lookup key.
    pub ec_point: String,
    /// Label of the private key object inside the module.
    pub private_key_id: String,
    /// Label of the public key object inside the module.
    pub public_key_id: String,
}

#[async_trait]
pub trait KeyRecordStore: Send + Sync {
    /// Persist a record. Fails on a duplicate `ec_point`.
    async fn create(&self, record: &KeyRecord) -> Result<(), WalletError>;

    /// Look up a record by its public point. Returns None on a miss.
    async fn find_one(&self, ec_point: &str) -> Result<Option<KeyRecord>, WalletError>;
}

#[async_trait]
impl<S: KeyRecordStore + ?Sized> KeyRecordStore for Arc<S> {
    async fn create(&self, record: &KeyRecord) -> Result<(), WalletError> {
        (**self).create(record).await
    }

    async fn find_one(&self, ec_point: &str) -> Result<Option<KeyRecord>, WalletError> {
        (**self).find_one(ec_point).await
    }
}

// ==================== PostgreSQL store ====================

pub struct PgKeyRecordStore {
    pool: PgPool,
}

impl PgKeyRecordStore {
    pub async fn connect(database_url: &str) -> Result<Self, WalletError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Create the backing table when missing.
    pub async fn initialize(&self) -> Result<(), WalletError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS key_records (
                ec_point TEXT PRIMARY KEY,
                private_key_id TEXT NOT NULL,
                public_key_id TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyRecordStore for PgKeyRecordStore {
    async fn create(&self, record: &KeyRecord) -> Result<(), WalletError> {
        sqlx::query(
            "INSERT INTO key_records (ec_point, private_key_id, public_key_id)
             VALUES ($1, $2, $3)",
        )
        .bind(&record.ec_point)
        .bind(&record.private_key_id)
        .bind(&record.public_key_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_one(&self, ec_point: &str) -> Result<Option<KeyRecord>, WalletError> {
        let record = sqlx::query_as::<_, KeyRecord>(
            "SELECT ec_point, private_key_id, public_key_id
             FROM key_records WHERE ec_point = $1",
        )
        .bind(ec_point)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

// ==================== In-memory store ====================

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryKeyRecordStore {
    records: RwLock<HashMap<String, KeyRecord>>,
}

impl MemoryKeyRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyRecordStore for MemoryKeyRecordStore {
    async fn create(&self, record: &KeyRecord) -> Result<(), WalletError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| WalletError::Storage("record lock poisoned".into()))?;
        if records.contains_key(&record.ec_point) {
            return Err(WalletError::Storage(format!(
                "duplicate record for point {}",
                record.ec_point
            )));
        }
        records.insert(record.ec_point.clone(), record.clone());
        Ok(())
    }

    async fn find_one(&self, ec_point: &str) -> Result<Option<KeyRecord>, WalletError> {
        let records = self
            .records
            .read()
            .map_err(|_| WalletError::Storage("record lock poisoned".into()))?;
        Ok(records.get(ec_point).cloned())
    }
}
