//! Extended-public-key codec and public child derivation.
//!
//! Everything here is bit-exact BIP-32: the 78-byte serialization decoded and
//! re-encoded against registry version bytes (standard or SLIP-0132), CKDpub
//! for non-hardened children, and reconstruction of an account node from raw
//! key material. Version bytes are pure presentation; decoding normalizes any
//! accepted serialization to the same [`Xpub`].

use bitcoin::base58;
use bitcoin::bip32::ChildNumber;
pub use bitcoin::bip32::Xpub;
use bitcoin::hashes::{sha256d, Hash};
use keychain_chain_params::{ChainParams, Scheme, VERSION_XPUB};
use secp256k1::{PublicKey, SECP256K1};
use thiserror::Error;

/// Length of the raw BIP-32 extended-key payload.
pub const XPUB_PAYLOAD_LEN: usize = 78;

/// Length of the Base58Check checksum trailer.
const CHECKSUM_LEN: usize = 4;

/// HD tree depth of an account node (`m/purpose'/coin_type'/account'`).
const ACCOUNT_DEPTH: u8 = 3;

const HARDENED_OFFSET: u32 = 1 << 31;

/// Error type for extended-key operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The string is not valid base58.
    #[error("invalid base58 character in extended key")]
    InvalidBase58,

    /// The decoded payload is not 78 bytes plus checksum.
    #[error("extended key payload has wrong length {0}")]
    WrongLength(usize),

    /// The Base58Check checksum does not match the payload.
    #[error("extended key checksum mismatch")]
    InvalidChecksum,

    /// The version bytes are not accepted for the target network.
    #[error("unknown extended key version bytes {0:02x?}")]
    UnknownVersion([u8; 4]),

    /// The embedded public key is not a valid compressed secp256k1 point.
    #[error("extended key does not carry a valid compressed public key")]
    InvalidPublicKey,

    /// CKDpub produced an out-of-range tweak or the point at infinity at this
    /// index. Per BIP-32 the caller should skip to the next index.
    #[error("child derivation invalid at index {0}, skip to the next index")]
    InvalidDerivation(u32),

    /// The index has the hardened bit set and cannot be derived from an xpub.
    #[error("hardened index {0:#010x} cannot be derived from an xpub")]
    HardenedIndex(u32),
}

/// Decodes a Base58Check extended public key against the network's accepted
/// version bytes (standard BIP-32 plus the SLIP-0132 aliases).
///
/// The result is normalized: whichever accepted version the input carried,
/// the returned [`Xpub`] holds the same key material.
pub fn decode_xpub(encoded: &str, params: &ChainParams) -> Result<Xpub, KeyError> {
    let raw = base58::decode(encoded).map_err(|_| KeyError::InvalidBase58)?;
    if raw.len() != XPUB_PAYLOAD_LEN + CHECKSUM_LEN {
        return Err(KeyError::WrongLength(raw.len()));
    }

    let (payload, checksum) = raw.split_at(XPUB_PAYLOAD_LEN);
    let expected = sha256d::Hash::hash(payload).to_byte_array();
    if checksum != &expected[..CHECKSUM_LEN] {
        return Err(KeyError::InvalidChecksum);
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&payload[0..4]);
    if !params.accepted_pub_versions().contains(&version) {
        return Err(KeyError::UnknownVersion(version));
    }

    // Only compressed public keys exist in an xpub serialization.
    if payload[45] != 0x02 && payload[45] != 0x03 {
        return Err(KeyError::InvalidPublicKey);
    }

    // `Xpub::decode` insists on the two standard BIP-32 versions; swap ours
    // in now that it has been validated against the registry.
    let mut data = payload.to_vec();
    data[0..4].copy_from_slice(&VERSION_XPUB);
    Xpub::decode(&data).map_err(|_| KeyError::InvalidPublicKey)
}

/// Serializes an extended public key with the network's standard BIP-32
/// version bytes.
pub fn encode_xpub(xpub: &Xpub, params: &ChainParams) -> String {
    encode_with_version(xpub, params.bip32_pub_version)
}

/// Serializes an extended public key with the SLIP-0132 version bytes of the
/// given scheme on the given network.
pub fn encode_slip132_xpub(xpub: &Xpub, params: &ChainParams, scheme: Scheme) -> String {
    encode_with_version(xpub, params.slip132_pub_version(scheme))
}

fn encode_with_version(xpub: &Xpub, version: [u8; 4]) -> String {
    let mut data = xpub.encode();
    data[0..4].copy_from_slice(&version);
    base58::encode_check(&data)
}

/// Derives the non-hardened child of an extended public key (BIP-32 CKDpub).
///
/// Fails with [`KeyError::HardenedIndex`] before touching the curve when the
/// index has bit 31 set, and with [`KeyError::InvalidDerivation`] in the
/// astronomically rare case the derived tweak falls outside the curve order
/// or the child is the point at infinity.
pub fn derive_child(xpub: &Xpub, index: u32) -> Result<Xpub, KeyError> {
    if index & HARDENED_OFFSET != 0 {
        return Err(KeyError::HardenedIndex(index));
    }
    let child = ChildNumber::from_normal_idx(index).expect("index is below 2^31");
    xpub.ckd_pub(SECP256K1, child)
        .map_err(|_| KeyError::InvalidDerivation(index))
}

/// Reconstructs an account-level extended public key from raw key material.
///
/// The account node sits at depth 3 with a hardened child number; its parent
/// is unknown to us, so the parent fingerprint is zero. The public key may be
/// compressed or uncompressed; it is stored compressed either way.
pub fn account_from_parts(
    public_key: &[u8],
    chain_code: &[u8; 32],
    account_index: u32,
) -> Result<Xpub, KeyError> {
    let key = PublicKey::from_slice(public_key).map_err(|_| KeyError::InvalidPublicKey)?;

    let mut data = Vec::with_capacity(XPUB_PAYLOAD_LEN);
    data.extend_from_slice(&VERSION_XPUB);
    data.push(ACCOUNT_DEPTH);
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(&(account_index | HARDENED_OFFSET).to_be_bytes());
    data.extend_from_slice(chain_code);
    data.extend_from_slice(&key.serialize());

    Xpub::decode(&data).map_err(|_| KeyError::InvalidPublicKey)
}
