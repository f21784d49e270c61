//! This crate contains the shared types of the keychain service and the pure
//! used/observable index accounting they carry.
//!
//! It lies at the bottom of the crate hierarchy: nothing here touches a store
//! or the curve, which is what keeps the gap-limit invariants testable in
//! isolation.

pub mod meta;
pub mod path;

pub use meta::{AddressInfo, DerivationEntry, KeychainInfo, Meta, DEFAULT_LOOKAHEAD_SIZE};
pub use path::{Change, DerivationPath, PathError, HARDENED_OFFSET};
