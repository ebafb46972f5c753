//! Domain model of a two party payment channel.
//!
//! The types here are owned values: cloning a [State] copies everything, so
//! handing out clones is enough to keep shared copies from being mutated.

pub mod codec;
pub mod format;
pub mod verifier;

use std::collections::HashSet;

use crate::types::{Bytes32, Hash, U256};

pub use codec::{decode_allocation, decode_state, encode_allocation, encode_state};
pub use format::{AssetRegister, ChannelFormatter};
pub use verifier::{verify_allocation, verify_open_channel_request};

/// Index of a participant in the channel.
///
/// `0` is the proposer of the channel, which is always ourselves.
pub type PartIdx = usize;

/// Channels always have exactly two participants.
pub const PARTICIPANTS: usize = 2;

/// Our contribution to the jointly derived channel nonce. Opaque to the
/// wallet, forwarded verbatim to the peer.
pub type NonceShare = Bytes32;

/// Asset of the native backend: either the chain's own coin or a fungible
/// token identified by its type script hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeAsset {
    is_native: bool,
    token_script_hash: Option<Hash>,
}

impl NativeAsset {
    pub fn coin() -> Self {
        Self {
            is_native: true,
            token_script_hash: None,
        }
    }

    pub fn token(script_hash: Hash) -> Self {
        Self {
            is_native: false,
            token_script_hash: Some(script_hash),
        }
    }

    /// True for the chain's own currency, which is displayed scaled to whole
    /// coins.
    pub fn is_native(&self) -> bool {
        self.is_native
    }

    pub fn token_script_hash(&self) -> Option<Hash> {
        self.token_script_hash
    }
}

/// Asset of another backend, kept as the opaque bytes received on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericAsset(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Asset {
    Native(NativeAsset),
    Generic(GenericAsset),
}

impl Asset {
    pub fn is_native(&self) -> bool {
        match self {
            Asset::Native(a) => a.is_native(),
            Asset::Generic(_) => false,
        }
    }
}

/// Funds locked into a sub-channel. Never valid in this wallet, but decoded
/// so the verifier can reject it explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAlloc {
    pub id: Hash,
    pub balances: Vec<U256>,
    pub index_map: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("asset index {0} out of range")]
    UnknownAsset(usize),
    #[error("participant index {0} out of range")]
    UnknownParticipant(PartIdx),
    #[error("insufficient funds: has {available}, needs {requested}")]
    InsufficientFunds { available: U256, requested: U256 },
}

/// Which participant owns how much of each asset.
///
/// `balances[i]` belongs to `assets[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Allocation {
    pub assets: Vec<Asset>,
    pub balances: Vec<[U256; PARTICIPANTS]>,
    pub locked: Vec<SubAlloc>,
}

impl Allocation {
    /// Allocation with all balances set to zero.
    pub fn new(assets: Vec<Asset>) -> Self {
        let balances = vec![[U256::zero(); PARTICIPANTS]; assets.len()];
        Self {
            assets,
            balances,
            locked: vec![],
        }
    }

    pub fn balance(&self, part: PartIdx, asset: usize) -> Option<U256> {
        self.balances.get(asset).and_then(|b| b.get(part)).copied()
    }

    pub fn set_asset_balances(
        &mut self,
        asset: usize,
        balances: [U256; PARTICIPANTS],
    ) -> Result<(), TransferError> {
        let slot = self
            .balances
            .get_mut(asset)
            .ok_or(TransferError::UnknownAsset(asset))?;
        *slot = balances;
        Ok(())
    }

    /// Moves `amount` of `asset` from participant `from` to `to`.
    ///
    /// Leaves the allocation untouched on error.
    pub fn transfer_balance(
        &mut self,
        from: PartIdx,
        to: PartIdx,
        asset: usize,
        amount: U256,
    ) -> Result<(), TransferError> {
        if from >= PARTICIPANTS {
            return Err(TransferError::UnknownParticipant(from));
        }
        if to >= PARTICIPANTS {
            return Err(TransferError::UnknownParticipant(to));
        }
        let bals = self
            .balances
            .get_mut(asset)
            .ok_or(TransferError::UnknownAsset(asset))?;
        if bals[from] < amount {
            return Err(TransferError::InsufficientFunds {
                available: bals[from],
                requested: amount,
            });
        }
        bals[from] -= amount;
        bals[to] += amount;
        Ok(())
    }

    /// Sum of all participants' balances per asset.
    pub fn total_assets(&self) -> Vec<U256> {
        self.balances
            .iter()
            .map(|b| b.iter().fold(U256::zero(), |acc, x| acc + *x))
            .collect()
    }
}

/// Identifier of a channel application (state channel logic).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppId(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum App {
    /// Plain payment channel.
    #[default]
    None,
    Registered(AppId),
}

/// Looks up application identifiers received on the wire.
pub trait AppResolver: Send + Sync {
    fn is_known(&self, id: &AppId) -> bool;
}

/// In-memory set of known applications.
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    apps: HashSet<AppId>,
}

impl AppRegistry {
    pub fn with_app(mut self, id: AppId) -> Self {
        self.apps.insert(id);
        self
    }
}

impl AppResolver for AppRegistry {
    fn is_known(&self, id: &AppId) -> bool {
        self.apps.contains(id)
    }
}

/// Complete state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub id: Hash,
    pub version: u64,
    pub is_final: bool,
    pub allocation: Allocation,
    pub app: App,
    pub data: Vec<u8>,
}

impl State {
    /// Create the state that will replace this one, with the version bumped.
    pub fn make_next_state(&self) -> Self {
        State {
            version: self.version + 1,
            ..self.clone()
        }
    }
}
