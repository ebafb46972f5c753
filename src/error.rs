//! Error types of the wallet.
//!
//! Every concern gets its own enum so callers can tell a rejected proposal
//! apart from a broken key store. The gRPC layer maps them onto
//! [tonic::Status] in one place ([crate::service]).

use thiserror::Error;

use crate::channel::TransferError;

/// A proposal or allocation is structurally invalid.
///
/// Always recoverable: reported to the remote caller as a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing proposal")]
    MissingProposal,

    #[error("only two party channels are supported, got {0} peers")]
    PeerCount(usize),

    #[error("missing base channel proposal")]
    MissingBaseProposal,

    #[error("missing initial balances")]
    MissingInitialBalances,

    #[error("missing balance distribution in initial balances")]
    MissingBalanceDistribution,

    #[error("locked funds are not supported")]
    LockedFundsUnsupported,

    #[error("missing balances")]
    MissingBalances,

    #[error(
        "mismatch in number of assets and balances: got {assets} assets, but {balances} assets defined in balances"
    )]
    AssetBalanceCountMismatch { assets: usize, balances: usize },

    #[error("only two party channels are supported, but {found} balances found for asset {asset}")]
    TwoPartyOnly { asset: usize, found: usize },
}

/// A wire payload could not be turned into the domain model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed allocation: {0}")]
    MalformedAllocation(String),

    #[error("malformed state: {0}")]
    MalformedState(String),

    #[error("unknown application: 0x{0}")]
    UnknownApplication(String),
}

/// Failure inside the signing gate. Callers treat it as authorization
/// denied and never retry automatically.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing failed: {0}")]
    Crypto(#[from] k256::ecdsa::Error),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("transaction has no script group for lock {0}")]
    NothingToSign(String),

    #[error("encoding signed transaction: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Dialing or redialing a peer service failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),

    #[error("connect: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Loading keys, deployments or listener configuration failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid deployment descriptor: {0}")]
    InvalidDeployment(#[from] serde_json::Error),

    #[error("unknown network {0:?}, expected \"testnet\" or \"mainnet\"")]
    UnknownNetwork(String),

    #[error("invalid asset register: {0}")]
    InvalidAssetRegister(&'static str),
}

/// Errors of the wallet service itself.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not implemented")]
    NotImplemented,

    #[error("update sink already bound")]
    AlreadyBound,

    #[error("no tokio runtime to deliver observer updates on")]
    NoRuntime,

    #[error("server: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("server task: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// A channel operation requested through the channel service failed.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("no open channel")]
    NoOpenChannel,

    #[error("asset is not part of the channel")]
    UnknownAsset,

    #[error("transfer: {0}")]
    Transfer(#[from] TransferError),

    #[error("rejected by channel service: {0}")]
    Rejected(String),

    #[error("channel service: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("unexpected response from channel service: {0}")]
    UnexpectedResponse(String),
}

/// Querying the chain indexer failed.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}
