//! Human readable rendering of channel states and wallet balances for
//! observers.

use std::collections::HashMap;

use super::{Asset, NativeAsset, State, PARTICIPANTS};
use crate::{address::OnChainAddress, error::ConfigError, types::U256};

/// Base units per whole coin of the native currency.
const BASE_UNITS_PER_COIN: u64 = 100_000_000;

/// Maps assets to display names and back.
#[derive(Debug, Clone, Default)]
pub struct AssetRegister {
    names: HashMap<Asset, String>,
    by_name: HashMap<String, Asset>,
    assets: Vec<Asset>,
}

impl AssetRegister {
    pub fn new(assets: Vec<Asset>, names: Vec<String>) -> Result<Self, ConfigError> {
        if assets.len() != names.len() {
            return Err(ConfigError::InvalidAssetRegister(
                "length of assets and names must be equal",
            ));
        }
        let mut register = AssetRegister::default();
        for (asset, name) in assets.iter().zip(names) {
            if name.is_empty() {
                return Err(ConfigError::InvalidAssetRegister("name cannot be empty"));
            }
            if register.names.contains_key(asset) {
                return Err(ConfigError::InvalidAssetRegister("duplicate asset"));
            }
            if register.by_name.contains_key(&name) {
                return Err(ConfigError::InvalidAssetRegister("duplicate name"));
            }
            register.names.insert(asset.clone(), name.clone());
            register.by_name.insert(name, asset.clone());
        }
        register.assets = assets;
        Ok(register)
    }

    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.by_name.get(name)
    }

    pub fn name(&self, asset: &Asset) -> Option<&str> {
        self.names.get(asset).map(String::as_str)
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }
}

/// Renders an amount of the native currency in whole coins with two
/// decimals, rounding half up.
pub fn format_native(amount: U256) -> String {
    let per_cent = U256::from(BASE_UNITS_PER_COIN / 100);
    let cents = amount.saturating_add(per_cent / 2) / per_cent;
    let hundred = U256::from(100);
    format!("{}.{:02}", cents / hundred, (cents % hundred).low_u64())
}

fn format_amount(asset: &Asset, amount: U256) -> String {
    if asset.is_native() {
        format_native(amount)
    } else {
        amount.to_string()
    }
}

/// Formats states and balances of one wallet's channel.
#[derive(Debug, Clone)]
pub struct ChannelFormatter {
    parties: [OnChainAddress; PARTICIPANTS],
    register: AssetRegister,
}

impl ChannelFormatter {
    pub fn new(parties: [OnChainAddress; PARTICIPANTS], register: AssetRegister) -> Self {
        Self { parties, register }
    }

    fn asset_name<'a>(&'a self, asset: &Asset) -> &'a str {
        self.register.name(asset).unwrap_or("unknown asset")
    }

    pub fn format_state(&self, state: &State) -> String {
        let alloc = &state.allocation;
        let mut ret = format!("Channel ID: {}\nBalances:\n", hex::encode(state.id.0));
        for (part, party) in self.parties.iter().enumerate() {
            ret += &format!("{party}:\n");
            for (i, asset) in alloc.assets.iter().enumerate() {
                let amount = alloc.balance(part, i).unwrap_or_default();
                ret += &format!(
                    "    {} {}\n",
                    format_amount(asset, amount),
                    self.asset_name(asset)
                );
            }
        }
        ret += &format!("Final: {}\nVersion: {}", state.is_final, state.version);
        ret
    }

    /// Renders the on-chain balance of the wallet, which is always held in
    /// the native currency.
    pub fn format_balance(&self, amount: U256) -> String {
        let native = Asset::Native(NativeAsset::coin());
        format!(
            "{} {}",
            format_native(amount),
            self.register.name(&native).unwrap_or("native")
        )
    }
}
