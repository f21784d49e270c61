//! Storage contract and backends for keychain records.
//!
//! The store is a mapping from descriptor to a versioned [`Record`]. Writers
//! never mutate in place: a record is replaced through [`KeychainStore::swap`]
//! with the version it was read at, so concurrent mutations of one descriptor
//! serialize through compare-and-swap while different descriptors proceed in
//! parallel.

pub mod errors;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use keychain_primitives::Meta;

pub use crate::errors::{StoreError, StoreResult};
pub use crate::memory::InMemoryStore;
pub use crate::sqlite::{SqliteStore, StoreConfig};

/// A versioned keychain record. The version is the compare-and-swap token:
/// it starts at 1 on create and bumps on every successful swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Monotonic record version.
    pub version: u64,

    /// The keychain state at that version.
    pub meta: Meta,
}

/// Capability contract every store backend implements.
#[async_trait]
pub trait KeychainStore: Send + Sync {
    /// Returns the current record of a descriptor.
    async fn get(&self, descriptor: &str) -> StoreResult<Record>;

    /// Atomically inserts a new record at version 1. Refuses to overwrite.
    async fn create(&self, descriptor: &str, meta: &Meta) -> StoreResult<Record>;

    /// Replaces the record iff its stored version equals `expected_version`,
    /// bumping the version; fails with [`StoreError::Conflict`] otherwise.
    async fn swap(&self, descriptor: &str, expected_version: u64, meta: &Meta)
        -> StoreResult<Record>;

    /// Removes the record of a descriptor.
    async fn delete(&self, descriptor: &str) -> StoreResult<()>;
}

#[async_trait]
impl<T: KeychainStore + ?Sized> KeychainStore for std::sync::Arc<T> {
    async fn get(&self, descriptor: &str) -> StoreResult<Record> {
        (**self).get(descriptor).await
    }

    async fn create(&self, descriptor: &str, meta: &Meta) -> StoreResult<Record> {
        (**self).create(descriptor, meta).await
    }

    async fn swap(
        &self,
        descriptor: &str,
        expected_version: u64,
        meta: &Meta,
    ) -> StoreResult<Record> {
        (**self).swap(descriptor, expected_version, meta).await
    }

    async fn delete(&self, descriptor: &str) -> StoreResult<()> {
        (**self).delete(descriptor).await
    }
}
