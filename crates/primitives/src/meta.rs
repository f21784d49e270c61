//! Per-account keychain state and its index accounting.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::secp256k1::PublicKey;
use keychain_chain_params::{Network, Scheme};
use serde::{Deserialize, Serialize};

use crate::path::{Change, DerivationPath};

/// Gap-limit constant applied when a keychain is created without an explicit
/// lookahead size (BIP-44 §6).
pub const DEFAULT_LOOKAHEAD_SIZE: u32 = 20;

/// The account-level information of a registered keychain.
///
/// This is the externally visible state: everything a client needs to resume
/// watching an account. The derivation cache and the address reverse index
/// live next to it in [`Meta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeychainInfo {
    /// Opaque client-chosen identifier of this keychain in the store.
    pub descriptor: String,

    /// Account-level extended public key, standard HD version bytes.
    pub xpub: String,

    /// The same key serialized with SLIP-0132 scheme-specific version bytes.
    pub slip32_xpub: String,

    /// External chain extended public key (`…/0`, depth 4).
    pub external_xpub: String,

    /// Internal chain extended public key (`…/1`, depth 4).
    pub internal_xpub: String,

    /// Smallest external index `i` such that every index in `[0, i)` is used
    /// and `i` itself is not.
    pub max_consecutive_external_index: u32,

    /// Same as `max_consecutive_external_index`, internal chain.
    pub max_consecutive_internal_index: u32,

    /// Used external indexes above `max_consecutive_external_index`, i.e. the
    /// indexes currently opening gaps.
    pub non_consecutive_external_indexes: BTreeSet<u32>,

    /// Same as `non_consecutive_external_indexes`, internal chain.
    pub non_consecutive_internal_indexes: BTreeSet<u32>,

    /// Number of consecutive unused indexes to keep observable past the used
    /// region.
    pub lookahead_size: u32,

    /// Derivation scheme of this keychain.
    pub scheme: Scheme,

    /// Network addresses are encoded for.
    pub network: Network,
}

/// A cached derivation: the child public key at one `(change, index)` path
/// and whether the chain has seen it used.
///
/// The public key is recomputable from the account xpub at any time; the
/// `used` flag is authoritative state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationEntry {
    /// Child public key at HD tree depth 5.
    pub public_key: PublicKey,

    /// Whether the address at this derivation has on-chain history.
    pub used: bool,
}

/// An address materialized from the keychain, with the path it derives from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    /// The encoded address.
    pub address: String,

    /// The `(change, index)` path the address derives from.
    pub derivation: DerivationPath,

    /// The chain the path belongs to.
    pub change: Change,
}

/// The full persisted state of one keychain: account info, the per-chain
/// derivation caches and the address reverse index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Account-level information.
    pub main: KeychainInfo,

    /// Derivation cache for the external chain, keyed by address index.
    pub external_derivations: BTreeMap<u32, DerivationEntry>,

    /// Derivation cache for the internal chain, keyed by address index.
    pub internal_derivations: BTreeMap<u32, DerivationEntry>,

    /// Reverse index from encoded address to its derivation path, covering
    /// every derivation in the caches.
    pub addresses: BTreeMap<String, DerivationPath>,
}

impl Meta {
    /// Builds the state of a freshly created keychain: counters at zero,
    /// empty caches.
    pub fn new(main: KeychainInfo) -> Self {
        Self {
            main,
            external_derivations: BTreeMap::new(),
            internal_derivations: BTreeMap::new(),
            addresses: BTreeMap::new(),
        }
    }

    /// The extended public key of the given chain.
    pub fn change_xpub(&self, change: Change) -> &str {
        match change {
            Change::External => &self.main.external_xpub,
            Change::Internal => &self.main.internal_xpub,
        }
    }

    /// The max consecutive (gapless) used index of the given chain.
    pub fn max_consecutive_index(&self, change: Change) -> u32 {
        match change {
            Change::External => self.main.max_consecutive_external_index,
            Change::Internal => self.main.max_consecutive_internal_index,
        }
    }

    /// Used indexes of the given chain that currently open gaps.
    pub fn non_consecutive_indexes(&self, change: Change) -> &BTreeSet<u32> {
        match change {
            Change::External => &self.main.non_consecutive_external_indexes,
            Change::Internal => &self.main.non_consecutive_internal_indexes,
        }
    }

    /// The derivation cache of the given chain.
    pub fn derivations(&self, change: Change) -> &BTreeMap<u32, DerivationEntry> {
        match change {
            Change::External => &self.external_derivations,
            Change::Internal => &self.internal_derivations,
        }
    }

    /// Mutable access to the derivation cache of the given chain.
    pub fn derivations_mut(&mut self, change: Change) -> &mut BTreeMap<u32, DerivationEntry> {
        match change {
            Change::External => &mut self.external_derivations,
            Change::Internal => &mut self.internal_derivations,
        }
    }

    /// The exclusive upper bound of the observable window on the given chain:
    /// `max_consecutive + |gaps| + lookahead`.
    pub fn max_observable_index(&self, change: Change) -> u32 {
        let gaps = self.non_consecutive_indexes(change).len() as u32;
        self.max_consecutive_index(change) + gaps + self.main.lookahead_size
    }

    /// Whether an index falls inside the observable window of its chain.
    pub fn is_observable(&self, path: DerivationPath) -> bool {
        path.index() < self.max_observable_index(path.change())
    }

    /// Whether the given index is marked used on the given chain.
    pub fn is_used(&self, change: Change, index: u32) -> bool {
        index < self.max_consecutive_index(change)
            || self.non_consecutive_indexes(change).contains(&index)
    }

    /// Records on-chain usage of one derivation path.
    ///
    /// Advances the max consecutive index when the marked index sits exactly
    /// at the frontier, swallowing any gap indexes that become consecutive in
    /// the process; otherwise records the index as a gap. Marking an index
    /// that is already used is a no-op. Returns whether anything changed.
    pub fn mark_as_used(&mut self, path: DerivationPath) -> bool {
        let change = path.change();
        let index = path.index();

        if self.is_used(change, index) {
            return false;
        }

        let frontier = self.max_consecutive_index(change);
        if index == frontier {
            let mut new_frontier = index + 1;
            let gaps = self.non_consecutive_mut(change);
            // Gap closure: marked indexes right above the frontier stop being
            // gaps once the frontier reaches them.
            while gaps.remove(&new_frontier) {
                new_frontier += 1;
            }
            self.set_max_consecutive_index(change, new_frontier);
        } else {
            self.non_consecutive_mut(change).insert(index);
        }

        if let Some(entry) = self.derivations_mut(change).get_mut(&index) {
            entry.used = true;
        }

        true
    }

    fn set_max_consecutive_index(&mut self, change: Change, index: u32) {
        match change {
            Change::External => self.main.max_consecutive_external_index = index,
            Change::Internal => self.main.max_consecutive_internal_index = index,
        }
    }

    fn non_consecutive_mut(&mut self, change: Change) -> &mut BTreeSet<u32> {
        match change {
            Change::External => &mut self.main.non_consecutive_external_indexes,
            Change::Internal => &mut self.main.non_consecutive_internal_indexes,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn test_meta() -> Meta {
        Meta::new(KeychainInfo {
            descriptor: "test".to_owned(),
            xpub: String::new(),
            slip32_xpub: String::new(),
            external_xpub: String::new(),
            internal_xpub: String::new(),
            max_consecutive_external_index: 0,
            max_consecutive_internal_index: 0,
            non_consecutive_external_indexes: BTreeSet::new(),
            non_consecutive_internal_indexes: BTreeSet::new(),
            lookahead_size: DEFAULT_LOOKAHEAD_SIZE,
            scheme: Scheme::Legacy,
            network: Network::BitcoinMainnet,
        })
    }

    fn ext(index: u32) -> DerivationPath {
        DerivationPath::new(Change::External, index).unwrap()
    }

    #[test]
    fn fresh_keychain_window() {
        let meta = test_meta();
        assert_eq!(meta.max_consecutive_index(Change::External), 0);
        assert_eq!(meta.max_observable_index(Change::External), 20);
        assert_eq!(meta.max_observable_index(Change::Internal), 20);
    }

    #[test]
    fn marking_frontier_advances_it() {
        let mut meta = test_meta();
        assert!(meta.mark_as_used(ext(0)));
        assert_eq!(meta.max_consecutive_index(Change::External), 1);
        assert!(meta.non_consecutive_indexes(Change::External).is_empty());
        assert_eq!(meta.max_observable_index(Change::External), 21);

        // The other chain is untouched.
        assert_eq!(meta.max_consecutive_index(Change::Internal), 0);
    }

    #[test]
    fn marking_ahead_of_frontier_opens_gap() {
        let mut meta = test_meta();
        assert!(meta.mark_as_used(ext(3)));
        assert_eq!(meta.max_consecutive_index(Change::External), 0);
        assert_eq!(
            meta.non_consecutive_indexes(Change::External),
            &BTreeSet::from([3])
        );
        assert_eq!(meta.max_observable_index(Change::External), 21);
    }

    #[test]
    fn filling_gap_closes_it() {
        let mut meta = test_meta();
        meta.mark_as_used(ext(3));
        meta.mark_as_used(ext(0));
        meta.mark_as_used(ext(1));
        assert_eq!(meta.max_consecutive_index(Change::External), 2);

        meta.mark_as_used(ext(2));
        assert_eq!(meta.max_consecutive_index(Change::External), 4);
        assert!(meta.non_consecutive_indexes(Change::External).is_empty());
        assert_eq!(meta.max_observable_index(Change::External), 24);
    }

    #[test]
    fn closure_swallows_consecutive_run_of_gaps() {
        let mut meta = test_meta();
        for index in [1, 2, 3, 5] {
            meta.mark_as_used(ext(index));
        }
        assert_eq!(meta.max_consecutive_index(Change::External), 0);

        meta.mark_as_used(ext(0));
        assert_eq!(meta.max_consecutive_index(Change::External), 4);
        assert_eq!(
            meta.non_consecutive_indexes(Change::External),
            &BTreeSet::from([5])
        );
    }

    #[test]
    fn marking_used_index_is_noop() {
        let mut meta = test_meta();
        meta.mark_as_used(ext(0));
        meta.mark_as_used(ext(2));
        let snapshot = meta.clone();

        assert!(!meta.mark_as_used(ext(0)));
        assert!(!meta.mark_as_used(ext(2)));
        assert_eq!(meta, snapshot);
    }

    proptest! {
        /// The frontier always equals the smallest unused index, gaps are
        /// always used indexes strictly above it, and the window size is
        /// exactly `frontier + |gaps| + lookahead`.
        #[test]
        fn accounting_matches_used_set(marks in proptest::collection::vec((0u32..64, any::<bool>()), 0..48)) {
            let mut meta = test_meta();
            let mut used: BTreeSet<(Change, u32)> = BTreeSet::new();

            for (index, internal) in marks {
                let change = if internal { Change::Internal } else { Change::External };
                meta.mark_as_used(DerivationPath::new(change, index).unwrap());
                used.insert((change, index));
            }

            for change in [Change::External, Change::Internal] {
                let chain_used: BTreeSet<u32> = used
                    .iter()
                    .filter(|(c, _)| *c == change)
                    .map(|(_, i)| *i)
                    .collect();
                let mex = (0..).find(|i| !chain_used.contains(i)).unwrap();

                prop_assert_eq!(meta.max_consecutive_index(change), mex);
                for gap in meta.non_consecutive_indexes(change) {
                    prop_assert!(*gap > mex);
                    prop_assert!(chain_used.contains(gap));
                }
                let gaps: BTreeSet<u32> = chain_used.iter().copied().filter(|i| *i > mex).collect();
                prop_assert_eq!(meta.non_consecutive_indexes(change), &gaps);
                prop_assert_eq!(
                    meta.max_observable_index(change),
                    mex + gaps.len() as u32 + meta.main.lookahead_size
                );
            }
        }

        /// Marking the same sequence twice leaves the state unchanged.
        #[test]
        fn marking_is_idempotent(marks in proptest::collection::vec(0u32..64, 0..32)) {
            let mut meta = test_meta();
            for &index in &marks {
                meta.mark_as_used(ext(index));
            }
            let snapshot = meta.clone();
            for &index in &marks {
                meta.mark_as_used(ext(index));
            }
            prop_assert_eq!(meta, snapshot);
        }

        /// The final state of a set of distinct marks does not depend on the
        /// order they arrive in.
        #[test]
        fn disjoint_marks_commute(indexes in proptest::collection::btree_set(0u32..64, 0..32)) {
            let mut forward = test_meta();
            for &index in &indexes {
                forward.mark_as_used(ext(index));
            }

            let mut backward = test_meta();
            for &index in indexes.iter().rev() {
                backward.mark_as_used(ext(index));
            }

            prop_assert_eq!(forward, backward);
        }
    }
}
