//! The JSON-RPC adapter around the keychain engine.
//!
//! Thin by construction: every method parses its wire arguments, applies the
//! request deadline and delegates to the engine. The engine writes state
//! atomically at the end of each mutation, so a request that hits the
//! deadline mid-flight persists nothing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::types::error::INVALID_PARAMS_CODE;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use keychain_chain_params::ChainParamsError;
use keychain_engine::{AccountKey, KeychainError, KeychainResult, KeychainService};
use keychain_primitives::{AddressInfo, Change, DerivationPath, KeychainInfo};
use keychain_rpc::traits::KeychainApiServer;
use keychain_rpc::types::{error_codes, RpcAccount};
use keychain_store::KeychainStore;
use tokio::time::timeout;
use tracing::info;

/// Starts the RPC server for the keychain daemon.
pub(crate) async fn start_rpc(rpc: KeychainRpc, rpc_addr: &str) -> anyhow::Result<ServerHandle> {
    let mut rpc_module = RpcModule::new(());
    rpc_module
        .merge(rpc.into_rpc())
        .context("merge keychain api")?;

    let server = ServerBuilder::default()
        .build(rpc_addr)
        .await
        .context("build keychain rpc server")?;
    let handle = server.start(rpc_module);

    info!("keychain RPC server started at: {rpc_addr}");
    Ok(handle)
}

/// RPC server state: the engine over the configured store plus the
/// per-request deadline.
#[derive(Clone)]
pub(crate) struct KeychainRpc {
    service: KeychainService<Arc<dyn KeychainStore>>,
    request_timeout: Duration,
    default_lookahead: Option<u32>,
}

impl KeychainRpc {
    /// Creates a new instance of [`KeychainRpc`].
    pub(crate) fn new(
        service: KeychainService<Arc<dyn KeychainStore>>,
        request_timeout: Duration,
        default_lookahead: Option<u32>,
    ) -> Self {
        Self {
            service,
            request_timeout,
            default_lookahead,
        }
    }

    /// Runs an engine call under the request deadline.
    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = KeychainResult<T>>,
    ) -> RpcResult<T> {
        match timeout(self.request_timeout, fut).await {
            Ok(result) => result.map_err(rpc_error),
            Err(_) => Err(rpc_error(KeychainError::DeadlineExceeded)),
        }
    }
}

#[async_trait]
impl KeychainApiServer for KeychainRpc {
    async fn create_keychain(
        &self,
        descriptor: String,
        account: RpcAccount,
        scheme: String,
        network: String,
        lookahead_size: Option<u32>,
    ) -> RpcResult<KeychainInfo> {
        let scheme = scheme
            .parse()
            .map_err(|e: ChainParamsError| rpc_error(e.into()))?;
        let network = network
            .parse()
            .map_err(|e: ChainParamsError| rpc_error(e.into()))?;
        let account = convert_account(account)?;
        let lookahead_size = lookahead_size.or(self.default_lookahead);

        self.with_deadline(self.service.create_keychain(
            &descriptor,
            account,
            scheme,
            network,
            lookahead_size,
        ))
        .await
    }

    async fn keychain_info(&self, descriptor: String) -> RpcResult<KeychainInfo> {
        self.with_deadline(self.service.get_keychain_info(&descriptor))
            .await
    }

    async fn account_extended_key(&self, descriptor: String) -> RpcResult<String> {
        self.with_deadline(self.service.get_account_extended_key(&descriptor))
            .await
    }

    async fn fresh_addresses(
        &self,
        descriptor: String,
        change: Change,
        batch_size: u32,
    ) -> RpcResult<Vec<AddressInfo>> {
        self.with_deadline(
            self.service
                .get_fresh_addresses(&descriptor, change, batch_size),
        )
        .await
    }

    async fn mark_path_as_used(&self, descriptor: String, derivation: [u32; 2]) -> RpcResult<()> {
        let path =
            DerivationPath::try_from(derivation).map_err(|e| rpc_error(KeychainError::from(e)))?;
        self.with_deadline(self.service.mark_path_as_used(&descriptor, path))
            .await
    }

    async fn mark_addresses_as_used(
        &self,
        descriptor: String,
        addresses: Vec<String>,
    ) -> RpcResult<()> {
        self.with_deadline(self.service.mark_addresses_as_used(&descriptor, &addresses))
            .await
    }

    async fn all_observable_addresses(
        &self,
        descriptor: String,
        change: Change,
        from_index: u32,
        to_index: u32,
    ) -> RpcResult<Vec<AddressInfo>> {
        self.with_deadline(self.service.get_all_observable_addresses(
            &descriptor,
            change,
            from_index,
            to_index,
        ))
        .await
    }

    async fn all_observable_indexes(
        &self,
        descriptor: String,
        change: Change,
        from_index: u32,
        to_index: u32,
    ) -> RpcResult<Vec<u32>> {
        self.with_deadline(self.service.get_all_observable_indexes(
            &descriptor,
            change,
            from_index,
            to_index,
        ))
        .await
    }

    async fn delete_keychain(&self, descriptor: String) -> RpcResult<()> {
        self.with_deadline(self.service.delete_keychain(&descriptor))
            .await
    }
}

fn convert_account(account: RpcAccount) -> Result<AccountKey, ErrorObjectOwned> {
    match account {
        RpcAccount::ExtendedPublicKey(xpub) => Ok(AccountKey::Xpub(xpub)),
        RpcAccount::PublicKey {
            public_key,
            chain_code,
            account_index,
        } => {
            let public_key = hex::decode(&public_key)
                .map_err(|_| invalid_params("public_key is not valid hex"))?;
            let chain_code: [u8; 32] = hex::decode(&chain_code)
                .map_err(|_| invalid_params("chain_code is not valid hex"))?
                .try_into()
                .map_err(|_| invalid_params("chain_code must be 32 bytes"))?;
            Ok(AccountKey::Parts {
                public_key,
                chain_code,
                account_index,
            })
        }
    }
}

fn invalid_params(message: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(INVALID_PARAMS_CODE, message.to_owned(), None::<()>)
}

/// Maps the engine error taxonomy onto the wire error codes.
fn rpc_error(err: KeychainError) -> ErrorObjectOwned {
    let code = match &err {
        KeychainError::ChainParams(ChainParamsError::UnsupportedNetwork(_)) => {
            error_codes::UNSUPPORTED_NETWORK
        }
        KeychainError::ChainParams(ChainParamsError::UnsupportedScheme(_)) => {
            error_codes::UNSUPPORTED_SCHEME
        }
        KeychainError::MalformedKey(_) => error_codes::MALFORMED_KEY,
        KeychainError::InvalidChecksum => error_codes::INVALID_CHECKSUM,
        KeychainError::InvalidDerivation(_) => error_codes::INVALID_DERIVATION,
        KeychainError::HardenedIndex(_) => error_codes::HARDENED_INDEX,
        KeychainError::UnrecognizedChange(_) => error_codes::UNRECOGNIZED_CHANGE,
        KeychainError::NotFound(_) => error_codes::NOT_FOUND,
        KeychainError::AlreadyExists(_) => error_codes::ALREADY_EXISTS,
        KeychainError::AddressNotObservable(_) => error_codes::ADDRESS_NOT_OBSERVABLE,
        KeychainError::Conflict(_) => error_codes::CONFLICT,
        KeychainError::DeadlineExceeded => error_codes::DEADLINE_EXCEEDED,
        KeychainError::Address(_) | KeychainError::Store(_) | KeychainError::Internal(_) => {
            error_codes::INTERNAL
        }
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}
