//! Derivation paths relative to an account node.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The high bit that marks a child index as hardened in BIP-32.
pub const HARDENED_OFFSET: u32 = 1 << 31;

/// Error type for derivation path construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathError {
    /// The change level is neither external (0) nor internal (1).
    #[error("unrecognized change index: {0}")]
    UnrecognizedChange(u32),

    /// The address index has the hardened bit set, which cannot be derived
    /// from an extended public key.
    #[error("hardened index {0:#010x} in a public derivation path")]
    HardenedIndex(u32),
}

/// The BIP-44 chain under an account a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    /// Chain 0: receive addresses.
    External,
    /// Chain 1: change addresses.
    Internal,
}

impl Change {
    /// The child index of this chain under the account node.
    pub const fn index(&self) -> u32 {
        match self {
            Change::External => 0,
            Change::Internal => 1,
        }
    }
}

impl TryFrom<u32> for Change {
    type Error = PathError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Change::External),
            1 => Ok(Change::Internal),
            other => Err(PathError::UnrecognizedChange(other)),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::External => write!(f, "external"),
            Change::Internal => write!(f, "internal"),
        }
    }
}

/// A two-level non-hardened derivation path `(change, address_index)`
/// relative to an account node.
///
/// Serializes as the plain `[change, index]` pair used on the wire and in the
/// persisted record. Construction rejects hardened indexes, so a value of
/// this type is always derivable from an xpub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct DerivationPath {
    change: Change,
    index: u32,
}

impl DerivationPath {
    /// Builds a path, rejecting hardened address indexes.
    pub fn new(change: Change, index: u32) -> Result<Self, PathError> {
        if index & HARDENED_OFFSET != 0 {
            return Err(PathError::HardenedIndex(index));
        }
        Ok(Self { change, index })
    }

    /// The chain this path derives under.
    pub const fn change(&self) -> Change {
        self.change
    }

    /// The address index on that chain.
    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl TryFrom<[u32; 2]> for DerivationPath {
    type Error = PathError;

    fn try_from(raw: [u32; 2]) -> Result<Self, Self::Error> {
        let change = Change::try_from(raw[0])?;
        DerivationPath::new(change, raw[1])
    }
}

impl From<DerivationPath> for [u32; 2] {
    fn from(path: DerivationPath) -> Self {
        [path.change.index(), path.index]
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.change.index(), self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_from_u32() {
        assert_eq!(Change::try_from(0), Ok(Change::External));
        assert_eq!(Change::try_from(1), Ok(Change::Internal));
        assert_eq!(Change::try_from(2), Err(PathError::UnrecognizedChange(2)));
    }

    #[test]
    fn rejects_hardened_index() {
        assert_eq!(
            DerivationPath::new(Change::External, HARDENED_OFFSET),
            Err(PathError::HardenedIndex(HARDENED_OFFSET))
        );
        assert_eq!(
            DerivationPath::try_from([0, HARDENED_OFFSET | 44]),
            Err(PathError::HardenedIndex(HARDENED_OFFSET | 44))
        );
    }

    #[test]
    fn serializes_as_pair() {
        let path = DerivationPath::new(Change::Internal, 7).unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "[1,7]");

        let parsed: DerivationPath = serde_json::from_str("[0,3]").unwrap();
        assert_eq!(parsed, DerivationPath::new(Change::External, 3).unwrap());

        assert!(serde_json::from_str::<DerivationPath>("[2,0]").is_err());
    }

    #[test]
    fn displays_as_slash_pair() {
        let path = DerivationPath::new(Change::External, 12).unwrap();
        assert_eq!(path.to_string(), "0/12");
    }
}
