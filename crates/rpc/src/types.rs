//! Types for the RPC server.

use serde::{Deserialize, Serialize};

/// The account material a keychain is registered from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcAccount {
    /// A serialized extended public key, standard or SLIP-0132 version bytes.
    ExtendedPublicKey(String),

    /// Raw account material for wallets that never serialized an xpub.
    PublicKey {
        /// Hex-encoded SEC1 public key, compressed or uncompressed.
        public_key: String,

        /// Hex-encoded 32-byte BIP-32 chain code.
        chain_code: String,

        /// Account index below the coin type, without the hardened bit.
        account_index: u32,
    },
}

/// JSON-RPC error codes of the keychain error taxonomy.
pub mod error_codes {
    /// Descriptor absent in the store.
    pub const NOT_FOUND: i32 = -32001;
    /// Descriptor collision on create.
    pub const ALREADY_EXISTS: i32 = -32002;
    /// Mark-used outside the observable window.
    pub const ADDRESS_NOT_OBSERVABLE: i32 = -32003;
    /// Compare-and-swap kept losing past the retry budget.
    pub const CONFLICT: i32 = -32004;
    /// The request deadline elapsed.
    pub const DEADLINE_EXCEEDED: i32 = -32005;
    /// Network tag not in the registry.
    pub const UNSUPPORTED_NETWORK: i32 = -32010;
    /// Scheme tag not recognized.
    pub const UNSUPPORTED_SCHEME: i32 = -32011;
    /// Extended key structurally invalid.
    pub const MALFORMED_KEY: i32 = -32012;
    /// Base58Check checksum mismatch.
    pub const INVALID_CHECKSUM: i32 = -32013;
    /// CKDpub produced an unusable child; skip the index.
    pub const INVALID_DERIVATION: i32 = -32014;
    /// Hardened index in a public derivation request.
    pub const HARDENED_INDEX: i32 = -32015;
    /// Change tag neither external nor internal.
    pub const UNRECOGNIZED_CHANGE: i32 = -32016;
    /// Invariant violation or backend failure.
    pub const INTERNAL: i32 = -32099;
}
