//! SQLite implementation of the persistent store.
//!
//! One row per descriptor; the keychain state is persisted as a
//! self-describing JSON blob inside a schema-versioned envelope, with an
//! integer version column as the compare-and-swap token.

use std::time::Duration;

use async_trait::async_trait;
use keychain_primitives::Meta;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tokio::time::sleep;
use tracing::warn;

use crate::errors::{StoreError, StoreResult};
use crate::{KeychainStore, Record};

/// Schema version written into every record envelope.
const META_SCHEMA_VERSION: u32 = 1;

/// Retry configuration for the SQLite backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How many times a driver error is retried before surfacing.
    pub max_retry_count: u32,

    /// How long to wait between retries.
    pub backoff_period: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            backoff_period: Duration::from_millis(200),
        }
    }
}

/// Store backend over a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    config: StoreConfig,
}

impl SqliteStore {
    /// Creates the backend with the default retry config, initializing the
    /// schema if it does not exist yet.
    pub async fn new(pool: SqlitePool) -> StoreResult<Self> {
        Self::new_with_config(pool, StoreConfig::default()).await
    }

    /// Creates the backend with the given retry config, initializing the
    /// schema if it does not exist yet.
    pub async fn new_with_config(pool: SqlitePool, config: StoreConfig) -> StoreResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keychains (
                descriptor TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                meta BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, config })
    }

    /// Returns the underlying connection pool.
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl KeychainStore for SqliteStore {
    async fn get(&self, descriptor: &str) -> StoreResult<Record> {
        execute_with_retries(&self.config, || async move {
            let row = sqlx::query("SELECT version, meta FROM keychains WHERE descriptor = ?")
                .bind(descriptor)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::NotFound(descriptor.to_owned()))?;

            let version: i64 = row.try_get("version")?;
            let blob: Vec<u8> = row.try_get("meta")?;

            Ok(Record {
                version: version as u64,
                meta: decode_meta(&blob)?,
            })
        })
        .await
    }

    async fn create(&self, descriptor: &str, meta: &Meta) -> StoreResult<Record> {
        let blob = encode_meta(meta)?;
        let blob = blob.as_slice();

        execute_with_retries(&self.config, || async move {
            sqlx::query("INSERT INTO keychains (descriptor, version, meta) VALUES (?, 1, ?)")
                .bind(descriptor)
                .bind(blob)
                .execute(&self.pool)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(db) if db.is_unique_violation() => {
                        StoreError::AlreadyExists(descriptor.to_owned())
                    }
                    other => StoreError::Driver(other),
                })?;

            Ok(Record {
                version: 1,
                meta: meta.clone(),
            })
        })
        .await
    }

    async fn swap(
        &self,
        descriptor: &str,
        expected_version: u64,
        meta: &Meta,
    ) -> StoreResult<Record> {
        let blob = encode_meta(meta)?;
        let blob = blob.as_slice();

        execute_with_retries(&self.config, || async move {
            let result = sqlx::query(
                "UPDATE keychains SET version = version + 1, meta = ?
                 WHERE descriptor = ? AND version = ?",
            )
            .bind(blob)
            .bind(descriptor)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                // Distinguish a lost race from a missing record.
                let exists = sqlx::query("SELECT 1 FROM keychains WHERE descriptor = ?")
                    .bind(descriptor)
                    .fetch_optional(&self.pool)
                    .await?
                    .is_some();
                return Err(if exists {
                    StoreError::Conflict {
                        descriptor: descriptor.to_owned(),
                        expected: expected_version,
                    }
                } else {
                    StoreError::NotFound(descriptor.to_owned())
                });
            }

            Ok(Record {
                version: expected_version + 1,
                meta: meta.clone(),
            })
        })
        .await
    }

    async fn delete(&self, descriptor: &str) -> StoreResult<()> {
        execute_with_retries(&self.config, || async move {
            let result = sqlx::query("DELETE FROM keychains WHERE descriptor = ?")
                .bind(descriptor)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(descriptor.to_owned()));
            }
            Ok(())
        })
        .await
    }
}

fn encode_meta(meta: &Meta) -> StoreResult<Vec<u8>> {
    #[derive(Serialize)]
    struct Envelope<'a> {
        schema_version: u32,
        meta: &'a Meta,
    }

    Ok(serde_json::to_vec(&Envelope {
        schema_version: META_SCHEMA_VERSION,
        meta,
    })?)
}

fn decode_meta(blob: &[u8]) -> StoreResult<Meta> {
    #[derive(Deserialize)]
    struct Envelope {
        schema_version: u32,
        meta: Meta,
    }

    let envelope: Envelope = serde_json::from_slice(blob)?;
    if envelope.schema_version != META_SCHEMA_VERSION {
        return Err(StoreError::UnknownSchemaVersion(envelope.schema_version));
    }
    Ok(envelope.meta)
}

async fn execute_with_retries<T, F, Fut>(config: &StoreConfig, op: F) -> StoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(StoreError::Driver(err)) if attempt < config.max_retry_count => {
                attempt += 1;
                warn!(%err, attempt, "transient sqlite error, retrying");
                sleep(config.backoff_period).await;
            }
            other => return other,
        }
    }
}
