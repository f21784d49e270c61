//! Chain parameters for the networks supported by the keychain.
//!
//! Resolves a network tag to the magic bytes everything else is built from:
//! BIP-32 and SLIP-0132 extended-key version bytes, base58 address prefix
//! bytes and the bech32 human-readable part.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version bytes for a BIP-32 serialized extended public key on Bitcoin
/// mainnet (`xpub`).
pub const VERSION_XPUB: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];
/// Version bytes for `ypub`: mainnet extended public key for P2WPKH-in-P2SH.
pub const VERSION_YPUB: [u8; 4] = [0x04, 0x9D, 0x7C, 0xB2];
/// Version bytes for `zpub`: mainnet extended public key for P2WPKH.
pub const VERSION_ZPUB: [u8; 4] = [0x04, 0xB2, 0x47, 0x46];
/// Version bytes for `tpub`: testnet/regtest extended public key.
pub const VERSION_TPUB: [u8; 4] = [0x04, 0x35, 0x87, 0xCF];
/// Version bytes for `upub`: testnet extended public key for P2WPKH-in-P2SH.
pub const VERSION_UPUB: [u8; 4] = [0x04, 0x4A, 0x52, 0x62];
/// Version bytes for `vpub`: testnet extended public key for P2WPKH.
pub const VERSION_VPUB: [u8; 4] = [0x04, 0x5F, 0x1C, 0xF6];
/// Version bytes for `Ltub`: Litecoin mainnet extended public key.
pub const VERSION_LTUB: [u8; 4] = [0x01, 0x9D, 0xA4, 0x62];
/// Version bytes for `Mtub`: Litecoin mainnet extended public key for
/// P2WPKH-in-P2SH.
pub const VERSION_MTUB: [u8; 4] = [0x01, 0xB2, 0x6E, 0xF6];

/// Error type for chain parameter resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainParamsError {
    /// The network tag is not in the registry.
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// The scheme tag is not recognized.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// The network a keychain derives addresses for.
///
/// The coin is folded into the tag: Litecoin is recognized at the parameter
/// level only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// The main Bitcoin network.
    BitcoinMainnet,
    /// The current Bitcoin test network.
    BitcoinTestnet3,
    /// The Bitcoin regression test network.
    BitcoinRegtest,
    /// The main Litecoin network.
    LitecoinMainnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Network::BitcoinMainnet => "bitcoin_mainnet",
            Network::BitcoinTestnet3 => "bitcoin_testnet3",
            Network::BitcoinRegtest => "bitcoin_regtest",
            Network::LitecoinMainnet => "litecoin_mainnet",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Network {
    type Err = ChainParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bitcoin_mainnet" => Ok(Network::BitcoinMainnet),
            "bitcoin_testnet3" => Ok(Network::BitcoinTestnet3),
            "bitcoin_regtest" => Ok(Network::BitcoinRegtest),
            "litecoin_mainnet" => Ok(Network::LitecoinMainnet),
            other => Err(ChainParamsError::UnsupportedNetwork(other.to_owned())),
        }
    }
}

/// The derivation scheme of a keychain, which decides both the address
/// encoding and the SLIP-0132 version bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// BIP-44, P2PKH addresses.
    Legacy,
    /// BIP-49, P2SH-P2WPKH addresses.
    Segwit,
    /// BIP-84, P2WPKH addresses.
    NativeSegwit,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheme::Legacy => "legacy",
            Scheme::Segwit => "segwit",
            Scheme::NativeSegwit => "native_segwit",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Scheme {
    type Err = ChainParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(Scheme::Legacy),
            "segwit" => Ok(Scheme::Segwit),
            "native_segwit" => Ok(Scheme::NativeSegwit),
            other => Err(ChainParamsError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Magic bytes for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    /// The network these parameters belong to.
    pub network: Network,

    /// Standard BIP-32 version bytes for extended public keys.
    pub bip32_pub_version: [u8; 4],

    /// SLIP-0132 version bytes for [`Scheme::Segwit`] extended public keys.
    pub slip132_segwit_pub_version: [u8; 4],

    /// SLIP-0132 version bytes for [`Scheme::NativeSegwit`] extended public
    /// keys.
    pub slip132_native_segwit_pub_version: [u8; 4],

    /// Base58 prefix byte for P2PKH addresses.
    pub p2pkh_prefix: u8,

    /// Base58 prefix byte for P2SH addresses.
    pub p2sh_prefix: u8,

    /// Human-readable part for bech32 segwit addresses.
    pub bech32_hrp: &'static str,
}

const BITCOIN_MAINNET: ChainParams = ChainParams {
    network: Network::BitcoinMainnet,
    bip32_pub_version: VERSION_XPUB,
    slip132_segwit_pub_version: VERSION_YPUB,
    slip132_native_segwit_pub_version: VERSION_ZPUB,
    p2pkh_prefix: 0x00,
    p2sh_prefix: 0x05,
    bech32_hrp: "bc",
};

const BITCOIN_TESTNET3: ChainParams = ChainParams {
    network: Network::BitcoinTestnet3,
    bip32_pub_version: VERSION_TPUB,
    slip132_segwit_pub_version: VERSION_UPUB,
    slip132_native_segwit_pub_version: VERSION_VPUB,
    p2pkh_prefix: 0x6F,
    p2sh_prefix: 0xC4,
    bech32_hrp: "tb",
};

const BITCOIN_REGTEST: ChainParams = ChainParams {
    network: Network::BitcoinRegtest,
    bip32_pub_version: VERSION_TPUB,
    slip132_segwit_pub_version: VERSION_UPUB,
    slip132_native_segwit_pub_version: VERSION_VPUB,
    p2pkh_prefix: 0x6F,
    p2sh_prefix: 0xC4,
    bech32_hrp: "bcrt",
};

// SLIP-0132 registers no Litecoin alias for native segwit; the standard
// version bytes double as the native-segwit serialization there.
const LITECOIN_MAINNET: ChainParams = ChainParams {
    network: Network::LitecoinMainnet,
    bip32_pub_version: VERSION_LTUB,
    slip132_segwit_pub_version: VERSION_MTUB,
    slip132_native_segwit_pub_version: VERSION_LTUB,
    p2pkh_prefix: 0x30,
    p2sh_prefix: 0x32,
    bech32_hrp: "ltc",
};

impl ChainParams {
    /// Returns the parameters for the given network.
    pub const fn for_network(network: Network) -> &'static ChainParams {
        match network {
            Network::BitcoinMainnet => &BITCOIN_MAINNET,
            Network::BitcoinTestnet3 => &BITCOIN_TESTNET3,
            Network::BitcoinRegtest => &BITCOIN_REGTEST,
            Network::LitecoinMainnet => &LITECOIN_MAINNET,
        }
    }

    /// Returns the SLIP-0132 extended-public-key version bytes for the given
    /// scheme on this network.
    ///
    /// For [`Scheme::Legacy`] these are the standard BIP-32 bytes: SLIP-0132
    /// only aliases the segwit schemes.
    pub const fn slip132_pub_version(&self, scheme: Scheme) -> [u8; 4] {
        match scheme {
            Scheme::Legacy => self.bip32_pub_version,
            Scheme::Segwit => self.slip132_segwit_pub_version,
            Scheme::NativeSegwit => self.slip132_native_segwit_pub_version,
        }
    }

    /// Every extended-public-key version accepted on input for this network:
    /// the standard bytes plus the SLIP-0132 aliases.
    pub const fn accepted_pub_versions(&self) -> [[u8; 4]; 3] {
        [
            self.bip32_pub_version,
            self.slip132_segwit_pub_version,
            self.slip132_native_segwit_pub_version,
        ]
    }
}
