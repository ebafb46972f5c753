//! On-chain address form of a participant.

use core::fmt::Display;
use core::str::FromStr;

use bech32::{ToBase32, Variant};

use crate::{
    error::ConfigError,
    sig::{Bytes, Script, ScriptHashType},
    types::{Address, Hash},
};

/// Code hash of the secp256k1/blake160 sighash-all lock. Deployed with a type
/// id, so it is the same on mainnet and testnet.
pub const SECP256K1_BLAKE160_CODE_HASH: Hash = Hash([
    0x9b, 0xd7, 0xe0, 0x6f, 0x3e, 0xcf, 0x4b, 0xe0, 0xf2, 0xfc, 0xd2, 0x18, 0x8b, 0x23, 0xf1, 0xb9,
    0xfc, 0xc8, 0x8e, 0x5d, 0x4b, 0x65, 0xa8, 0x63, 0x7b, 0x17, 0x72, 0x3b, 0xbd, 0xa3, 0xcc, 0xe8,
]);

// Payload tag of the full address format.
const FULL_FORMAT: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
}

impl Network {
    /// Human readable prefix of addresses on this network.
    pub fn hrp(&self) -> &'static str {
        match self {
            Network::Testnet => "ckt",
            Network::Mainnet => "ckb",
        }
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "testnet" | "test" => Ok(Network::Testnet),
            "mainnet" | "main" => Ok(Network::Mainnet),
            _ => Err(ConfigError::UnknownNetwork(s.to_string())),
        }
    }
}

/// Lock script of a participant on a specific network.
///
/// `lock_args` is the blake160 hash of the participant's compressed public
/// key, see [crate::sig::Account::lock_args].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OnChainAddress {
    pub network: Network,
    pub code_hash: Hash,
    pub hash_type: ScriptHashType,
    pub lock_args: Address,
}

impl OnChainAddress {
    /// Address locked by the secp256k1/blake160 lock.
    pub fn new(lock_args: Address, network: Network) -> Self {
        Self {
            network,
            code_hash: SECP256K1_BLAKE160_CODE_HASH,
            hash_type: ScriptHashType::Type,
            lock_args,
        }
    }

    /// Same args under a different lock, e.g. the one of a dev chain.
    pub fn with_lock(self, code_hash: Hash, hash_type: ScriptHashType) -> Self {
        Self {
            code_hash,
            hash_type,
            ..self
        }
    }

    pub fn lock_script(&self) -> Script {
        Script {
            code_hash: self.code_hash,
            hash_type: self.hash_type,
            args: Bytes(self.lock_args.0.to_vec()),
        }
    }
}

/// Full format bech32m address.
impl Display for OnChainAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut payload = Vec::with_capacity(1 + Hash::LEN + 1 + self.lock_args.0.len());
        payload.push(FULL_FORMAT);
        payload.extend_from_slice(&self.code_hash.0);
        payload.push(self.hash_type.tag());
        payload.extend_from_slice(&self.lock_args.0);

        let encoded = bech32::encode(self.network.hrp(), payload.to_base32(), Variant::Bech32m)
            .map_err(|_| core::fmt::Error)?;
        f.write_str(&encoded)
    }
}
