//! User side of the channel: asks the channel service to open, pay over and
//! close the channel whose latest state the wallet keeps.
//!
//! Payments are local balance transfers on top of the cached state. The
//! channel service answers with the state it agreed on with the peer, which
//! goes through the same update path as an update notification.

use std::sync::Arc;

use tonic::transport::Channel;
use tracing::{debug, info, warn};

use crate::{
    channel::{
        decode_state, encode_allocation, encode_state, Allocation, Asset, PartIdx, State,
        PARTICIPANTS,
    },
    client::{ChannelServiceConnector, ResilientClient},
    error::PaymentError,
    perunchannel::{
        channel_close_response, channel_open_response,
        channel_service_client::ChannelServiceClient, channel_update_response,
        ChannelCloseRequest, ChannelOpenRequest, ChannelUpdateRequest, NewPerunClientRequest,
        RestoreChannelsRequest,
    },
    service::WalletService,
    types::{Hash, U256},
};

/// On-chain challenge duration of new channels, in seconds.
pub const DEFAULT_CHALLENGE_DURATION: u64 = 10;

/// Our side of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Proposer,
    Responder,
}

impl Role {
    pub fn index(self) -> PartIdx {
        match self {
            Role::Proposer => 0,
            Role::Responder => 1,
        }
    }

    pub fn peer(self) -> PartIdx {
        PARTICIPANTS - 1 - self.index()
    }
}

fn unexpected(msg: impl Into<String>) -> PaymentError {
    PaymentError::UnexpectedResponse(msg.into())
}

/// The agreed state must belong to the same channel, move forward and keep
/// the channel's total funds.
fn check_update(current: &State, agreed: &State) -> Result<(), PaymentError> {
    if agreed.id != current.id {
        return Err(unexpected(format!("update for channel {}", agreed.id.to_hex())));
    }
    if agreed.version <= current.version {
        return Err(unexpected(format!(
            "version {} does not follow {}",
            agreed.version, current.version
        )));
    }
    if agreed.allocation.total_assets() != current.allocation.total_assets() {
        return Err(unexpected("update changes the channel's total funds"));
    }
    Ok(())
}

#[derive(Debug)]
pub struct PaymentClient {
    rpc: ResilientClient<ChannelServiceConnector>,
    wallet: Arc<WalletService>,
    role: Role,
    challenge_duration: u64,
}

impl PaymentClient {
    pub fn new(
        rpc: ResilientClient<ChannelServiceConnector>,
        wallet: Arc<WalletService>,
        role: Role,
    ) -> Self {
        Self {
            rpc,
            wallet,
            role,
            challenge_duration: DEFAULT_CHALLENGE_DURATION,
        }
    }

    pub fn with_challenge_duration(mut self, secs: u64) -> Self {
        self.challenge_duration = secs;
        self
    }

    fn api(&self) -> ChannelServiceClient<Channel> {
        self.rpc.handle().as_ref().clone()
    }

    /// Proposes a channel to `peer` in which both sides put in `amount` of
    /// every listed asset. Returns the id of the new channel.
    pub async fn open_channel(
        &self,
        peer: Vec<u8>,
        funding: &[(Asset, U256)],
    ) -> Result<Hash, PaymentError> {
        let mut allocation = Allocation::new(funding.iter().map(|(a, _)| a.clone()).collect());
        for (i, (_, amount)) in funding.iter().enumerate() {
            allocation.set_asset_balances(i, [*amount; PARTICIPANTS])?;
        }

        let resp = self
            .api()
            .open_channel(ChannelOpenRequest {
                requester: self.wallet.gate().public_key(),
                peer,
                allocation: Some(encode_allocation(&allocation)),
                challenge_duration: self.challenge_duration,
            })
            .await?
            .into_inner();

        match resp.msg {
            Some(channel_open_response::Msg::ChannelId(id)) => {
                let id = Hash::from_slice(&id).map_err(|e| unexpected(format!("channel id: {e}")))?;
                info!(channel = %id.to_hex(), "channel opened");
                Ok(id)
            }
            Some(channel_open_response::Msg::Rejected(r)) => {
                warn!(reason = %r.reason, "channel proposal rejected");
                Err(PaymentError::Rejected(r.reason))
            }
            None => Err(unexpected("empty open response")),
        }
    }

    /// Pays `amounts` to the peer and returns the state both sides agreed
    /// on. Nothing is sent if a transfer does not fit the balances.
    pub async fn send_payment(&self, amounts: &[(Asset, U256)]) -> Result<State, PaymentError> {
        let current = self.wallet.state().ok_or(PaymentError::NoOpenChannel)?;
        let mut next = current.make_next_state();
        for (asset, amount) in amounts {
            let index = next
                .allocation
                .assets
                .iter()
                .position(|a| a == asset)
                .ok_or(PaymentError::UnknownAsset)?;
            next.allocation
                .transfer_balance(self.role.index(), self.role.peer(), index, *amount)?;
        }

        let resp = self
            .api()
            .update_channel(ChannelUpdateRequest {
                state: Some(encode_state(&next)),
            })
            .await?
            .into_inner();

        let agreed = match resp.msg {
            Some(channel_update_response::Msg::Update(wire)) => {
                decode_state(&wire, self.wallet.apps()).map_err(|e| unexpected(e.to_string()))?
            }
            Some(channel_update_response::Msg::Rejected(r)) => {
                warn!(reason = %r.reason, "payment rejected");
                return Err(PaymentError::Rejected(r.reason));
            }
            None => return Err(unexpected("empty update response")),
        };
        check_update(&current, &agreed)?;

        info!(
            channel = %agreed.id.to_hex(),
            version = agreed.version,
            "payment sent"
        );
        self.wallet.apply_update(agreed.clone());
        Ok(agreed)
    }

    /// Closes the channel and forgets its state.
    pub async fn settle(&self) -> Result<Hash, PaymentError> {
        let state = self.wallet.state().ok_or(PaymentError::NoOpenChannel)?;

        let resp = self
            .api()
            .close_channel(ChannelCloseRequest {
                channel_id: state.id.0.to_vec(),
            })
            .await?
            .into_inner();

        match resp.msg {
            Some(channel_close_response::Msg::ChannelId(_)) => {}
            Some(channel_close_response::Msg::Rejected(r)) => {
                warn!(reason = %r.reason, "settlement rejected");
                return Err(PaymentError::Rejected(r.reason));
            }
            None => return Err(unexpected("empty close response")),
        }

        self.wallet.channel_closed(&state.id);
        Ok(state.id)
    }

    /// Asks the channel service to bring back channels it persisted, e.g.
    /// after a restart. Does nothing while a channel is open. Returns
    /// whether a restore was requested.
    pub async fn restore(&self) -> Result<bool, PaymentError> {
        if self.wallet.state().is_some() {
            debug!("channel is already online");
            return Ok(false);
        }

        let mut api = self.api();
        if !api
            .new_perun_client(NewPerunClientRequest {})
            .await?
            .into_inner()
            .accepted
        {
            return Err(PaymentError::Rejected("client creation".into()));
        }
        if !api
            .restore_channels(RestoreChannelsRequest {})
            .await?
            .into_inner()
            .accepted
        {
            return Err(PaymentError::Rejected("channel restore".into()));
        }
        info!("channels restored");
        Ok(true)
    }
}
