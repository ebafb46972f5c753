//! Wallet side of a Perun payment channel node.
//!
//! The channel service drives the channel protocol and calls into this crate
//! whenever the private key has to authorize something: opening a channel,
//! signing a state or a funding transaction. The wallet checks what it is
//! asked to sign, keeps the latest channel state and tells local observers
//! about it.

pub mod address;
pub mod cache;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod indexer;
pub mod observer;
pub mod payment;
pub mod poller;
pub mod service;
pub mod sig;
pub mod types;

pub use address::{Network, OnChainAddress};
pub use client::{ChannelServiceConnector, GrpcConnector, ResilientClient, WalletConnector};
pub use gate::SigningGate;
pub use indexer::CkbIndexerSource;
pub use observer::{Observer, ObserverNotifier, UpdateSink};
pub use payment::{PaymentClient, Role};
pub use service::{WalletServer, WalletService};
pub use types::{Address, Hash, U256};

// The protobuf packages live at the crate root: generated code refers to the
// shared package as `super::perunwire`.
pub mod perunwire {
    include!(concat!(env!("OUT_DIR"), "/perunwire.rs"));
}

pub mod perunwallet {
    include!(concat!(env!("OUT_DIR"), "/perunwallet.rs"));
}

pub mod perunchannel {
    include!(concat!(env!("OUT_DIR"), "/perunchannel.rs"));
}
