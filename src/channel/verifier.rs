//! Structural checks a channel proposal has to pass before the wallet takes
//! part in opening the channel.
//!
//! Pure functions: nothing here touches the network, the key or the request.

use super::PARTICIPANTS;
use crate::{error::ValidationError, perunwallet::OpenChannelRequest, perunwire};

/// Accepts or rejects a proposed channel opening.
///
/// Checks run in a fixed order and stop at the first failure.
pub fn verify_open_channel_request(req: &OpenChannelRequest) -> Result<(), ValidationError> {
    let prop = req
        .proposal
        .as_ref()
        .ok_or(ValidationError::MissingProposal)?;

    if prop.peers.len() != PARTICIPANTS {
        return Err(ValidationError::PeerCount(prop.peers.len()));
    }

    let base = prop
        .base_channel_proposal
        .as_ref()
        .ok_or(ValidationError::MissingBaseProposal)?;
    let init_bals = base
        .init_bals
        .as_ref()
        .ok_or(ValidationError::MissingInitialBalances)?;
    let distribution = init_bals
        .balances
        .as_ref()
        .ok_or(ValidationError::MissingBalanceDistribution)?;

    // Fast path before the full allocation check. An empty distribution has
    // no balances for the first asset, which is just as wrong.
    let first = distribution
        .balances
        .first()
        .map(|b| b.balance.len())
        .unwrap_or(0);
    if first != PARTICIPANTS {
        return Err(ValidationError::TwoPartyOnly {
            asset: 0,
            found: first,
        });
    }

    verify_allocation(init_bals)
}

pub fn verify_allocation(allocation: &perunwire::Allocation) -> Result<(), ValidationError> {
    let assets = allocation.assets.len();

    if !allocation.locked.is_empty() {
        return Err(ValidationError::LockedFundsUnsupported);
    }

    let bals = allocation
        .balances
        .as_ref()
        .ok_or(ValidationError::MissingBalances)?;

    if bals.balances.len() != assets {
        return Err(ValidationError::AssetBalanceCountMismatch {
            assets,
            balances: bals.balances.len(),
        });
    }

    for (asset, bal) in bals.balances.iter().enumerate() {
        if bal.balance.len() != PARTICIPANTS {
            return Err(ValidationError::TwoPartyOnly {
                asset,
                found: bal.balance.len(),
            });
        }
    }

    Ok(())
}
