//! The keychain engine.
//!
//! [`KeychainService`] is the only surface clients interact with: it composes
//! the key and address codecs to materialize addresses and a
//! [`KeychainStore`] to persist per-account state. All mutating operations
//! compute against one snapshot of the record and commit with a single
//! compare-and-swap write, so no partial state is ever observable.

pub mod errors;

use keychain_addresses::encode_address;
use keychain_chain_params::{ChainParams, Network, Scheme};
use keychain_primitives::{
    AddressInfo, Change, DerivationEntry, DerivationPath, KeychainInfo, Meta,
    DEFAULT_LOOKAHEAD_SIZE,
};
use keychain_store::{KeychainStore, StoreError};
use keychain_xkeys::{
    account_from_parts, decode_xpub, derive_child, encode_slip132_xpub, encode_xpub, KeyError,
    Xpub,
};
use tracing::{debug, info};

pub use crate::errors::{KeychainError, KeychainResult};

/// How many times a lost compare-and-swap is recomputed and retried before
/// surfacing [`KeychainError::Conflict`].
const MAX_SWAP_RETRIES: u32 = 3;

/// The account-level key material a keychain is created from.
#[derive(Debug, Clone)]
pub enum AccountKey {
    /// A serialized extended public key, standard or SLIP-0132 version bytes.
    Xpub(String),

    /// Raw account material; the account node is reconstructed at depth 3
    /// with a hardened child number and an unknown (zero) parent fingerprint.
    Parts {
        /// Compressed or uncompressed SEC1 public key bytes.
        public_key: Vec<u8>,
        /// BIP-32 chain code of the account node.
        chain_code: [u8; 32],
        /// Account index below the coin type, without the hardened bit.
        account_index: u32,
    },
}

/// The keychain engine over a store backend.
#[derive(Debug, Clone)]
pub struct KeychainService<S> {
    store: S,
}

impl<S: KeychainStore> KeychainService<S> {
    /// Creates the engine over the given store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers a new keychain under `descriptor` and persists its initial
    /// state, with the first observable window already materialized.
    pub async fn create_keychain(
        &self,
        descriptor: &str,
        account: AccountKey,
        scheme: Scheme,
        network: Network,
        lookahead_size: Option<u32>,
    ) -> KeychainResult<KeychainInfo> {
        let params = ChainParams::for_network(network);

        let account_xpub = match &account {
            AccountKey::Xpub(encoded) => decode_xpub(encoded, params)?,
            AccountKey::Parts {
                public_key,
                chain_code,
                account_index,
            } => account_from_parts(public_key, chain_code, *account_index)?,
        };

        let external = derive_child(&account_xpub, Change::External.index())?;
        let internal = derive_child(&account_xpub, Change::Internal.index())?;

        let info = KeychainInfo {
            descriptor: descriptor.to_owned(),
            xpub: encode_xpub(&account_xpub, params),
            slip32_xpub: encode_slip132_xpub(&account_xpub, params, scheme),
            external_xpub: encode_xpub(&external, params),
            internal_xpub: encode_xpub(&internal, params),
            max_consecutive_external_index: 0,
            max_consecutive_internal_index: 0,
            non_consecutive_external_indexes: Default::default(),
            non_consecutive_internal_indexes: Default::default(),
            lookahead_size: lookahead_size.unwrap_or(DEFAULT_LOOKAHEAD_SIZE),
            scheme,
            network,
        };

        let mut meta = Meta::new(info);
        extend_observable_window(&mut meta)?;
        check_invariants(&meta)?;

        let record = self.store.create(descriptor, &meta).await?;
        info!(descriptor, %scheme, %network, "created keychain");
        Ok(record.meta.main)
    }

    /// Returns the account information of a keychain.
    pub async fn get_keychain_info(&self, descriptor: &str) -> KeychainResult<KeychainInfo> {
        Ok(self.store.get(descriptor).await?.meta.main)
    }

    /// Returns the account extended public key, standard version bytes.
    pub async fn get_account_extended_key(&self, descriptor: &str) -> KeychainResult<String> {
        Ok(self.store.get(descriptor).await?.meta.main.xpub)
    }

    /// Returns the next `batch_size` never-used addresses on a chain,
    /// starting at the max consecutive index. Read-only and idempotent:
    /// without interleaved marks, successive calls return the same batch.
    pub async fn get_fresh_addresses(
        &self,
        descriptor: &str,
        change: Change,
        batch_size: u32,
    ) -> KeychainResult<Vec<AddressInfo>> {
        let record = self.store.get(descriptor).await?;
        let meta = record.meta;
        let base = meta.max_consecutive_index(change);
        materialize_count(&meta, change, base, batch_size as usize)
    }

    /// Returns the next never-used address on a chain.
    pub async fn get_fresh_address(
        &self,
        descriptor: &str,
        change: Change,
    ) -> KeychainResult<AddressInfo> {
        self.get_fresh_addresses(descriptor, change, 1)
            .await?
            .pop()
            .ok_or_else(|| KeychainError::Internal("empty fresh address batch".to_owned()))
    }

    /// Records on-chain usage of one derivation path.
    pub async fn mark_path_as_used(
        &self,
        descriptor: &str,
        path: DerivationPath,
    ) -> KeychainResult<()> {
        self.mark_used(descriptor, MarkTargets::Paths(&[path]))
            .await
    }

    /// Records on-chain usage of a batch of addresses, resolved through the
    /// reverse index. The whole batch commits atomically or not at all.
    pub async fn mark_addresses_as_used(
        &self,
        descriptor: &str,
        addresses: &[String],
    ) -> KeychainResult<()> {
        self.mark_used(descriptor, MarkTargets::Addresses(addresses))
            .await
    }

    /// Returns the observable addresses of a chain with indexes in
    /// `[from, to]`; `to` is clipped to the end of the observable window.
    pub async fn get_all_observable_addresses(
        &self,
        descriptor: &str,
        change: Change,
        from_index: u32,
        to_index: u32,
    ) -> KeychainResult<Vec<AddressInfo>> {
        let record = self.store.get(descriptor).await?;
        let meta = record.meta;

        let Some(clipped_to) = clip_to_window(&meta, change, to_index) else {
            return Ok(Vec::new());
        };
        if from_index > clipped_to {
            return Ok(Vec::new());
        }
        materialize_range(&meta, change, from_index, clipped_to)
    }

    /// Returns the observable indexes of a chain in `[from, to]`, with the
    /// same clipping as [`Self::get_all_observable_addresses`].
    pub async fn get_all_observable_indexes(
        &self,
        descriptor: &str,
        change: Change,
        from_index: u32,
        to_index: u32,
    ) -> KeychainResult<Vec<u32>> {
        let record = self.store.get(descriptor).await?;
        let meta = record.meta;

        let Some(clipped_to) = clip_to_window(&meta, change, to_index) else {
            return Ok(Vec::new());
        };
        if from_index > clipped_to {
            return Ok(Vec::new());
        }
        Ok((from_index..=clipped_to).collect())
    }

    /// Removes a keychain from the store.
    pub async fn delete_keychain(&self, descriptor: &str) -> KeychainResult<()> {
        self.store.delete(descriptor).await?;
        info!(descriptor, "deleted keychain");
        Ok(())
    }

    async fn mark_used(
        &self,
        descriptor: &str,
        targets: MarkTargets<'_>,
    ) -> KeychainResult<()> {
        let mut attempt = 0;
        loop {
            let record = self.store.get(descriptor).await?;
            let mut meta = record.meta;

            // Resolve the whole batch against this snapshot before touching
            // anything, so a non-observable member fails the batch cleanly.
            let paths = targets.resolve(&meta)?;
            let mut changed = false;
            for path in &paths {
                changed |= meta.mark_as_used(*path);
            }

            if !changed {
                return Ok(());
            }

            extend_observable_window(&mut meta)?;
            check_invariants(&meta)?;

            match self.store.swap(descriptor, record.version, &meta).await {
                Ok(_) => {
                    debug!(descriptor, marked = paths.len(), "marked paths as used");
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) if attempt < MAX_SWAP_RETRIES => {
                    attempt += 1;
                    debug!(descriptor, attempt, "lost record swap, recomputing");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

enum MarkTargets<'a> {
    Paths(&'a [DerivationPath]),
    Addresses(&'a [String]),
}

impl MarkTargets<'_> {
    /// Resolves the targets to derivation paths against one state snapshot,
    /// failing if any of them falls outside the observable window.
    fn resolve(&self, meta: &Meta) -> KeychainResult<Vec<DerivationPath>> {
        match self {
            MarkTargets::Paths(paths) => {
                for path in *paths {
                    if !meta.is_observable(*path) {
                        return Err(KeychainError::AddressNotObservable(path.to_string()));
                    }
                }
                Ok(paths.to_vec())
            }
            MarkTargets::Addresses(addresses) => addresses
                .iter()
                .map(|address| {
                    meta.addresses
                        .get(address)
                        // Bech32 input is accepted in either case but the
                        // index stores the normalized lowercase form.
                        .or_else(|| meta.addresses.get(&address.to_lowercase()))
                        .copied()
                        .ok_or_else(|| KeychainError::AddressNotObservable(address.clone()))
                })
                .collect(),
        }
    }
}

/// Extends the derivation cache and address index so that every index of the
/// current observable window is materialized (invariants I3/I4 of the state).
///
/// Indexes whose derivation is invalid are skipped, as BIP-32 prescribes.
fn extend_observable_window(meta: &mut Meta) -> KeychainResult<()> {
    let params = ChainParams::for_network(meta.main.network);
    let scheme = meta.main.scheme;

    for change in [Change::External, Change::Internal] {
        let target = meta.max_observable_index(change);
        let chain_xpub = decode_xpub(meta.change_xpub(change), params)?;

        for index in 0..target {
            if meta.derivations(change).contains_key(&index) {
                continue;
            }
            let child = match derive_child(&chain_xpub, index) {
                Ok(child) => child,
                Err(KeyError::InvalidDerivation(_)) => continue,
                Err(err) => return Err(err.into()),
            };
            let address = encode_address(&child.public_key, scheme, params)?;
            let path = DerivationPath::new(change, index)?;
            meta.derivations_mut(change).insert(
                index,
                DerivationEntry {
                    public_key: child.public_key,
                    used: false,
                },
            );
            meta.addresses.insert(address, path);
        }
    }

    Ok(())
}

/// Clips an inclusive upper bound to the observable window; `None` when the
/// window is empty.
fn clip_to_window(meta: &Meta, change: Change, to_index: u32) -> Option<u32> {
    let max_observable = meta.max_observable_index(change);
    if max_observable == 0 {
        return None;
    }
    Some(to_index.min(max_observable - 1))
}

/// Materializes `count` addresses starting at `start`, reusing cached
/// derivations and skipping indexes with invalid derivations.
fn materialize_count(
    meta: &Meta,
    change: Change,
    start: u32,
    count: usize,
) -> KeychainResult<Vec<AddressInfo>> {
    let params = ChainParams::for_network(meta.main.network);
    let chain_xpub = decode_xpub(meta.change_xpub(change), params)?;

    let mut out = Vec::with_capacity(count);
    let mut index = start;
    while out.len() < count {
        if let Some(info) = address_at(meta, &chain_xpub, change, index, params)? {
            out.push(info);
        }
        index = index
            .checked_add(1)
            .ok_or_else(|| KeychainError::Internal("address index overflow".to_owned()))?;
    }
    Ok(out)
}

/// Materializes the addresses of the inclusive index range `[from, to]`.
fn materialize_range(
    meta: &Meta,
    change: Change,
    from: u32,
    to: u32,
) -> KeychainResult<Vec<AddressInfo>> {
    let params = ChainParams::for_network(meta.main.network);
    let chain_xpub = decode_xpub(meta.change_xpub(change), params)?;

    let mut out = Vec::with_capacity((to - from + 1) as usize);
    for index in from..=to {
        if let Some(info) = address_at(meta, &chain_xpub, change, index, params)? {
            out.push(info);
        }
    }
    Ok(out)
}

/// The address at one index: from the derivation cache when present, derived
/// on the fly otherwise (never persisted by reads). `None` when the index is
/// skipped per BIP-32.
fn address_at(
    meta: &Meta,
    chain_xpub: &Xpub,
    change: Change,
    index: u32,
    params: &ChainParams,
) -> KeychainResult<Option<AddressInfo>> {
    let public_key = match meta.derivations(change).get(&index) {
        Some(entry) => entry.public_key,
        None => match derive_child(chain_xpub, index) {
            Ok(child) => child.public_key,
            Err(KeyError::InvalidDerivation(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        },
    };

    let address = encode_address(&public_key, meta.main.scheme, params)?;
    Ok(Some(AddressInfo {
        address,
        derivation: DerivationPath::new(change, index)?,
        change,
    }))
}

/// Re-checks the gap invariant before anything is persisted: every gap index
/// must sit strictly above the max consecutive index.
fn check_invariants(meta: &Meta) -> KeychainResult<()> {
    for change in [Change::External, Change::Internal] {
        let frontier = meta.max_consecutive_index(change);
        if let Some(smallest_gap) = meta.non_consecutive_indexes(change).iter().next() {
            if *smallest_gap <= frontier {
                return Err(KeychainError::Internal(format!(
                    "gap index {smallest_gap} at or below frontier {frontier} on {change}"
                )));
            }
        }
    }
    Ok(())
}
