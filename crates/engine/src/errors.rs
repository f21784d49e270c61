//! The engine error taxonomy.
//!
//! Every failure a client can observe maps onto one variant here; the
//! lower-level crate errors convert into it at the engine boundary.

use keychain_addresses::AddressError;
use keychain_chain_params::ChainParamsError;
use keychain_primitives::PathError;
use keychain_store::StoreError;
use keychain_xkeys::KeyError;
use thiserror::Error;

/// Errors surfaced by keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    /// The network or scheme tag is not supported.
    #[error(transparent)]
    ChainParams(#[from] ChainParamsError),

    /// The extended key is structurally invalid (length, version bytes or
    /// curve point).
    #[error("malformed extended key: {0}")]
    MalformedKey(KeyError),

    /// The Base58Check checksum of the extended key does not match.
    #[error("invalid extended key checksum")]
    InvalidChecksum,

    /// CKDpub produced an unusable child at this index; per BIP-32 the index
    /// is skipped.
    #[error("child derivation invalid at index {0}")]
    InvalidDerivation(u32),

    /// A hardened index cannot be derived from an extended public key.
    #[error("hardened index {0:#010x} rejected")]
    HardenedIndex(u32),

    /// The change tag is neither external (0) nor internal (1).
    #[error("unrecognized change index: {0}")]
    UnrecognizedChange(u32),

    /// No keychain is registered under the descriptor.
    #[error("keychain not found: {0}")]
    NotFound(String),

    /// A keychain is already registered under the descriptor.
    #[error("keychain already exists: {0}")]
    AlreadyExists(String),

    /// The address or path is outside the observable window of its keychain.
    #[error("address not observable: {0}")]
    AddressNotObservable(String),

    /// Concurrent updates kept winning the compare-and-swap past the retry
    /// budget.
    #[error("conflicting concurrent updates on keychain: {0}")]
    Conflict(String),

    /// The operation deadline elapsed before completion.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Address encoding failed.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// The store failed for a reason other than the mapped taxonomy above.
    #[error("store: {0}")]
    Store(StoreError),

    /// A keychain invariant did not survive a mutation; the operation was
    /// aborted without persisting.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl From<KeyError> for KeychainError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::InvalidChecksum => Self::InvalidChecksum,
            KeyError::InvalidDerivation(index) => Self::InvalidDerivation(index),
            KeyError::HardenedIndex(index) => Self::HardenedIndex(index),
            other => Self::MalformedKey(other),
        }
    }
}

impl From<PathError> for KeychainError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::HardenedIndex(index) => Self::HardenedIndex(index),
            PathError::UnrecognizedChange(change) => Self::UnrecognizedChange(change),
        }
    }
}

impl From<StoreError> for KeychainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(descriptor) => Self::NotFound(descriptor),
            StoreError::AlreadyExists(descriptor) => Self::AlreadyExists(descriptor),
            StoreError::Conflict { descriptor, .. } => Self::Conflict(descriptor),
            other => Self::Store(other),
        }
    }
}

/// Wrapper type for engine results.
pub type KeychainResult<T> = Result<T, KeychainError>;
