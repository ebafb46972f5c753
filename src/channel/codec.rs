//! Conversion between the protobuf wire messages and the channel model.
//!
//! Decoding validates the structural invariants (one balance group per asset,
//! two balances per group) and never returns a partially filled value.

use super::{
    Allocation, App, AppId, AppResolver, Asset, GenericAsset, NativeAsset, State, SubAlloc,
    PARTICIPANTS,
};
use crate::{
    error::CodecError,
    perunwire,
    types::{Hash, U256},
};

const NATIVE_COIN_TAG: u8 = 0x01;
const NATIVE_TOKEN_TAG: u8 = 0x00;

fn malformed(msg: impl Into<String>) -> CodecError {
    CodecError::MalformedAllocation(msg.into())
}

/// Balances on the wire are big-endian integers without leading zeroes.
fn decode_balance(bytes: &[u8]) -> Result<U256, CodecError> {
    if bytes.len() > 32 {
        return Err(malformed(format!(
            "balance of {} bytes does not fit into 256 bits",
            bytes.len()
        )));
    }
    Ok(U256::from_big_endian(bytes))
}

fn encode_balance(value: &U256) -> Vec<u8> {
    value.to_be_bytes_trimmed()
}

fn decode_native_asset(bytes: &[u8]) -> Result<NativeAsset, CodecError> {
    match bytes {
        [NATIVE_COIN_TAG] => Ok(NativeAsset::coin()),
        [NATIVE_TOKEN_TAG, script_hash @ ..] => Hash::from_slice(script_hash)
            .map(NativeAsset::token)
            .map_err(|e| malformed(format!("token script hash: {e}"))),
        _ => Err(malformed(format!(
            "{} bytes are not a native asset",
            bytes.len()
        ))),
    }
}

pub fn encode_asset(asset: &Asset) -> Vec<u8> {
    match asset {
        Asset::Native(a) => match a.token_script_hash() {
            None => vec![NATIVE_COIN_TAG],
            Some(hash) => {
                let mut b = Vec::with_capacity(1 + Hash::LEN);
                b.push(NATIVE_TOKEN_TAG);
                b.extend_from_slice(&hash.0);
                b
            }
        },
        Asset::Generic(GenericAsset(bytes)) => bytes.clone(),
    }
}

/// Decodes the assets of an allocation.
///
/// The channel service sends untagged asset bytes and always puts the native
/// asset first, so index 0 decodes as [Asset::Native] and every other index as
/// [Asset::Generic]. This is a wire compatibility constraint: do not extend
/// it to more asset kinds.
fn decode_assets(assets: &[Vec<u8>]) -> Result<Vec<Asset>, CodecError> {
    assets
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            if i == 0 {
                decode_native_asset(bytes)
                    .map(Asset::Native)
                    .map_err(|e| malformed(format!("{i}'th asset: {e}")))
            } else {
                Ok(Asset::Generic(GenericAsset(bytes.clone())))
            }
        })
        .collect()
}

fn decode_participant_balances(
    asset: usize,
    value: &perunwire::Balance,
) -> Result<[U256; PARTICIPANTS], CodecError> {
    if value.balance.len() != PARTICIPANTS {
        return Err(malformed(format!(
            "asset {asset} has {} balances, expected {PARTICIPANTS}",
            value.balance.len()
        )));
    }
    let mut balances = [U256::zero(); PARTICIPANTS];
    for (a, b) in balances.iter_mut().zip(&value.balance) {
        *a = decode_balance(b)?;
    }
    Ok(balances)
}

fn decode_sub_alloc(index: usize, value: &perunwire::SubAlloc) -> Result<SubAlloc, CodecError> {
    let id = Hash::from_slice(&value.id)
        .map_err(|e| malformed(format!("{index}'th sub alloc id: {e}")))?;
    let balances = match &value.bals {
        Some(bals) => bals
            .balance
            .iter()
            .map(|b| decode_balance(b))
            .collect::<Result<Vec<_>, _>>()?,
        None => vec![],
    };
    let index_map = value
        .index_map
        .as_ref()
        .map(|m| m.index_map.clone())
        .unwrap_or_default();
    Ok(SubAlloc {
        id,
        balances,
        index_map,
    })
}

pub fn decode_allocation(value: &perunwire::Allocation) -> Result<Allocation, CodecError> {
    let balances = value
        .balances
        .as_ref()
        .ok_or_else(|| malformed("missing balances"))?;

    if balances.balances.len() != value.assets.len() {
        return Err(malformed(format!(
            "got {} assets, but {} balance groups",
            value.assets.len(),
            balances.balances.len()
        )));
    }

    let assets = decode_assets(&value.assets)?;
    let balances = balances
        .balances
        .iter()
        .enumerate()
        .map(|(i, b)| decode_participant_balances(i, b))
        .collect::<Result<Vec<_>, _>>()?;
    let locked = value
        .locked
        .iter()
        .enumerate()
        .map(|(i, s)| decode_sub_alloc(i, s))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Allocation {
        assets,
        balances,
        locked,
    })
}

pub fn encode_balances(balances: &[[U256; PARTICIPANTS]]) -> perunwire::Balances {
    perunwire::Balances {
        balances: balances
            .iter()
            .map(|group| perunwire::Balance {
                balance: group.iter().map(encode_balance).collect(),
            })
            .collect(),
    }
}

pub fn encode_allocation(value: &Allocation) -> perunwire::Allocation {
    perunwire::Allocation {
        assets: value.assets.iter().map(encode_asset).collect(),
        balances: Some(encode_balances(&value.balances)),
        locked: value
            .locked
            .iter()
            .map(|s| perunwire::SubAlloc {
                id: s.id.0.to_vec(),
                bals: Some(perunwire::Balance {
                    balance: s.balances.iter().map(encode_balance).collect(),
                }),
                index_map: Some(perunwire::IndexMap {
                    index_map: s.index_map.clone(),
                }),
            })
            .collect(),
    }
}

/// Empty application bytes mean "no application" and the data is ignored.
fn decode_app_and_data(
    app: &[u8],
    data: &[u8],
    apps: &dyn AppResolver,
) -> Result<(App, Vec<u8>), CodecError> {
    if app.is_empty() {
        return Ok((App::None, vec![]));
    }
    let id = AppId(app.to_vec());
    if !apps.is_known(&id) {
        return Err(CodecError::UnknownApplication(hex::encode(app)));
    }
    Ok((App::Registered(id), data.to_vec()))
}

pub fn decode_state(value: &perunwire::State, apps: &dyn AppResolver) -> Result<State, CodecError> {
    let id = Hash::from_slice(&value.id)
        .map_err(|e| CodecError::MalformedState(format!("channel id: {e}")))?;
    let allocation = value
        .allocation
        .as_ref()
        .ok_or_else(|| CodecError::MalformedState("missing allocation".into()))?;
    let allocation = decode_allocation(allocation)?;
    let (app, data) = decode_app_and_data(&value.app, &value.data, apps)?;

    Ok(State {
        id,
        version: value.version,
        is_final: value.is_final,
        allocation,
        app,
        data,
    })
}

pub fn encode_state(value: &State) -> perunwire::State {
    let app = match &value.app {
        App::None => vec![],
        App::Registered(id) => id.0.clone(),
    };
    perunwire::State {
        id: value.id.0.to_vec(),
        version: value.version,
        app,
        allocation: Some(encode_allocation(&value.allocation)),
        data: value.data.clone(),
        is_final: value.is_final,
    }
}
