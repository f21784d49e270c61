//! In-memory store backend, used by unit tests and the daemon's `memory`
//! backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keychain_primitives::Meta;
use tokio::sync::RwLock;

use crate::errors::{StoreError, StoreResult};
use crate::{KeychainStore, Record};

/// Store backend holding every record in a process-local map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<String, Record>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeychainStore for InMemoryStore {
    async fn get(&self, descriptor: &str) -> StoreResult<Record> {
        self.records
            .read()
            .await
            .get(descriptor)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(descriptor.to_owned()))
    }

    async fn create(&self, descriptor: &str, meta: &Meta) -> StoreResult<Record> {
        let mut records = self.records.write().await;
        if records.contains_key(descriptor) {
            return Err(StoreError::AlreadyExists(descriptor.to_owned()));
        }
        let record = Record {
            version: 1,
            meta: meta.clone(),
        };
        records.insert(descriptor.to_owned(), record.clone());
        Ok(record)
    }

    async fn swap(
        &self,
        descriptor: &str,
        expected_version: u64,
        meta: &Meta,
    ) -> StoreResult<Record> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(descriptor)
            .ok_or_else(|| StoreError::NotFound(descriptor.to_owned()))?;
        if record.version != expected_version {
            return Err(StoreError::Conflict {
                descriptor: descriptor.to_owned(),
                expected: expected_version,
            });
        }
        record.version += 1;
        record.meta = meta.clone();
        Ok(record.clone())
    }

    async fn delete(&self, descriptor: &str) -> StoreResult<()> {
        self.records
            .write()
            .await
            .remove(descriptor)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(descriptor.to_owned()))
    }
}
