//! Store errors.

use thiserror::Error;

/// Errors that can occur when interacting with a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the descriptor.
    #[error("keychain not found: {0}")]
    NotFound(String),

    /// A record already exists for the descriptor.
    #[error("keychain already exists: {0}")]
    AlreadyExists(String),

    /// The record changed between read and swap.
    #[error("version conflict on {descriptor}: record moved past version {expected}")]
    Conflict {
        /// The descriptor whose swap lost the race.
        descriptor: String,
        /// The version the caller read before mutating.
        expected: u64,
    },

    /// The record blob could not be encoded or decoded.
    #[error("record encoding: {0}")]
    Codec(#[from] serde_json::Error),

    /// A stored blob carries a schema version this build does not understand.
    #[error("unsupported record schema version {0}")]
    UnknownSchemaVersion(u32),

    /// An error surfaced from the SQLite driver.
    #[error("sqlite: {0}")]
    Driver(#[from] sqlx::Error),
}

/// Wrapper type for store results.
pub type StoreResult<T> = Result<T, StoreError>;
