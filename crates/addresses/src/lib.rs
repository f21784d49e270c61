//! Address encoders for the keychain schemes.
//!
//! Every encoder takes a secp256k1 public key (always hashed in compressed
//! form) and the chain parameters that supply prefix bytes and the bech32
//! human-readable part. Witness v0 addresses follow BIP-173.

use bech32::Hrp;
use bitcoin::base58;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{ScriptBuf, WPubkeyHash};
use keychain_chain_params::{ChainParams, Scheme};
use thiserror::Error;

/// Error type for address encoding.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The registry's human-readable part is not valid for bech32.
    #[error("invalid bech32 human-readable part {0:?}")]
    InvalidHrp(String),

    /// The witness program could not be bech32-encoded.
    #[error("bech32 encoding failed: {0}")]
    Bech32(#[from] bech32::segwit::EncodeError),
}

/// Encodes the address of a public key under the given scheme and network.
pub fn encode_address(
    public_key: &PublicKey,
    scheme: Scheme,
    params: &ChainParams,
) -> Result<String, AddressError> {
    match scheme {
        Scheme::Legacy => Ok(p2pkh_address(public_key, params)),
        Scheme::Segwit => Ok(p2sh_p2wpkh_address(public_key, params)),
        Scheme::NativeSegwit => p2wpkh_address(public_key, params),
    }
}

/// Pay-to-pubkey-hash: Base58Check of the prefixed HASH160 of the key.
pub fn p2pkh_address(public_key: &PublicKey, params: &ChainParams) -> String {
    let pubkey_hash = hash160::Hash::hash(&public_key.serialize());
    base58_address(params.p2pkh_prefix, &pubkey_hash.to_byte_array())
}

/// Pay-to-witness-pubkey-hash nested in pay-to-script-hash (BIP-49): the
/// `0x00 0x14 <hash160(key)>` redeem script, hashed again and Base58Check
/// encoded under the P2SH prefix.
pub fn p2sh_p2wpkh_address(public_key: &PublicKey, params: &ChainParams) -> String {
    let pubkey_hash = hash160::Hash::hash(&public_key.serialize());
    let wpkh = WPubkeyHash::from_byte_array(pubkey_hash.to_byte_array());
    let redeem = ScriptBuf::new_p2wpkh(&wpkh);
    let script_hash = hash160::Hash::hash(redeem.as_bytes());
    base58_address(params.p2sh_prefix, &script_hash.to_byte_array())
}

/// Native pay-to-witness-pubkey-hash: a version-0 witness program under the
/// network's human-readable part, per BIP-173.
pub fn p2wpkh_address(
    public_key: &PublicKey,
    params: &ChainParams,
) -> Result<String, AddressError> {
    let program = hash160::Hash::hash(&public_key.serialize());
    let hrp = Hrp::parse(params.bech32_hrp)
        .map_err(|_| AddressError::InvalidHrp(params.bech32_hrp.to_owned()))?;
    Ok(bech32::segwit::encode_v0(hrp, &program.to_byte_array())?)
}

fn base58_address(prefix: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(prefix);
    payload.extend_from_slice(hash);
    base58::encode_check(&payload)
}
