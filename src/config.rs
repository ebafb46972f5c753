//! Files and settings the wallet reads on startup.

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    address::OnChainAddress,
    error::ConfigError,
    sig::{Account, LockSigner, ScriptHashType},
    types::{decode_hex, Hash},
};

/// Default lock script of the network the wallet is deployed on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockScriptInfo {
    pub code_hash: Hash,
    pub hash_type: ScriptHashType,
}

/// Deployment descriptor, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Deployment {
    pub default_lock_script: LockScriptInfo,
}

impl Deployment {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&read(path.as_ref())?)
    }

    /// Signer for `address` under the deployment's default lock.
    pub fn lock_signer(&self, address: OnChainAddress) -> LockSigner {
        LockSigner::new(address.with_lock(
            self.default_lock_script.code_hash,
            self.default_lock_script.hash_type,
        ))
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Parses a hex encoded secp256k1 private key (optional `0x` prefix).
pub fn parse_private_key(s: &str) -> Result<Account, ConfigError> {
    let bytes = decode_hex(s).map_err(|e| ConfigError::InvalidKey(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ConfigError::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    Account::from_bytes(&bytes).map_err(|e| ConfigError::InvalidKey(e.to_string()))
}

pub fn load_private_key(path: impl AsRef<Path>) -> Result<Account, ConfigError> {
    parse_private_key(&read(path.as_ref())?)
}

/// How often a [crate::client::ResilientClient] checks and redials its
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}
