//! Traits for the RPC server.

use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use keychain_primitives::{AddressInfo, Change, KeychainInfo};

use crate::types::RpcAccount;

/// The keychain API: registration, fresh address issuance, usage marking and
/// observable-window enumeration.
#[rpc(server, namespace = "keychain")]
pub trait KeychainApi {
    /// Registers a keychain for an account and returns its initial state.
    ///
    /// `scheme` and `network` are the string tags (`legacy`, `segwit`,
    /// `native_segwit`; `bitcoin_mainnet`, `bitcoin_testnet3`,
    /// `bitcoin_regtest`, `litecoin_mainnet`); unknown tags fail with the
    /// unsupported-scheme/-network error codes rather than a generic
    /// invalid-params error.
    #[method(name = "createKeychain")]
    async fn create_keychain(
        &self,
        descriptor: String,
        account: RpcAccount,
        scheme: String,
        network: String,
        lookahead_size: Option<u32>,
    ) -> RpcResult<KeychainInfo>;

    /// Returns the stored account information of a keychain.
    #[method(name = "keychainInfo")]
    async fn keychain_info(&self, descriptor: String) -> RpcResult<KeychainInfo>;

    /// Returns the account extended public key, standard version bytes.
    #[method(name = "accountExtendedKey")]
    async fn account_extended_key(&self, descriptor: String) -> RpcResult<String>;

    /// Returns the next `batch_size` never-used addresses on a chain.
    #[method(name = "freshAddresses")]
    async fn fresh_addresses(
        &self,
        descriptor: String,
        change: Change,
        batch_size: u32,
    ) -> RpcResult<Vec<AddressInfo>>;

    /// Records on-chain usage of a derivation path (`[change, index]`).
    #[method(name = "markPathAsUsed")]
    async fn mark_path_as_used(&self, descriptor: String, derivation: [u32; 2]) -> RpcResult<()>;

    /// Records on-chain usage of a batch of addresses.
    #[method(name = "markAddressesAsUsed")]
    async fn mark_addresses_as_used(
        &self,
        descriptor: String,
        addresses: Vec<String>,
    ) -> RpcResult<()>;

    /// Returns the observable addresses of a chain with indexes in
    /// `[from_index, to_index]`, clipped to the observable window.
    #[method(name = "allObservableAddresses")]
    async fn all_observable_addresses(
        &self,
        descriptor: String,
        change: Change,
        from_index: u32,
        to_index: u32,
    ) -> RpcResult<Vec<AddressInfo>>;

    /// Returns the observable indexes of a chain in `[from_index, to_index]`.
    #[method(name = "allObservableIndexes")]
    async fn all_observable_indexes(
        &self,
        descriptor: String,
        change: Change,
        from_index: u32,
        to_index: u32,
    ) -> RpcResult<Vec<u32>>;

    /// Unregisters a keychain.
    #[method(name = "deleteKeychain")]
    async fn delete_keychain(&self, descriptor: String) -> RpcResult<()>;
}
