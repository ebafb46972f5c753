//! Wallet service daemon.
//!
//! Serves the wallet gRPC API to a channel service until SIGINT or SIGTERM.

use std::{
    fs::File,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Parser;
use perun_wallet::{
    channel::{AppRegistry, Asset, AssetRegister, ChannelFormatter, NativeAsset},
    config::{load_private_key, Deployment, ReconnectPolicy},
    indexer::{CkbIndexerSource, DEFAULT_TIMEOUT},
    observer::ObserverId,
    poller::BalancePoller,
    types::decode_hex,
    Address, ChannelServiceConnector, Network, Observer, ObserverNotifier, OnChainAddress,
    PaymentClient, ResilientClient, Role, SigningGate, WalletServer, WalletService,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Wallet service for a Perun channel service.
#[derive(Parser, Debug)]
#[command(name = "wallet-service")]
#[command(version)]
struct Args {
    /// Address to serve the wallet API on
    #[arg(long, env = "WALLET_LISTEN", default_value = "127.0.0.1:50051")]
    listen: SocketAddr,

    /// File holding the hex encoded private key
    #[arg(long, env = "WALLET_KEY_FILE")]
    key: PathBuf,

    /// Network of the on-chain addresses (testnet or mainnet)
    #[arg(long, env = "WALLET_NETWORK", default_value = "testnet")]
    network: Network,

    /// Deployment descriptor (JSON)
    #[arg(long, env = "WALLET_DEPLOYMENT")]
    deployment: PathBuf,

    /// Hex address of the channel peer, used to label balances
    #[arg(long, env = "WALLET_PEER")]
    peer: String,

    /// JSON-RPC endpoint of a CKB node with the indexer enabled. Without it
    /// the wallet balance is not polled.
    #[arg(long, env = "WALLET_CKB_RPC")]
    ckb_rpc: Option<String>,

    /// Seconds between balance polls
    #[arg(long, env = "WALLET_BALANCE_INTERVAL", default_value_t = 5)]
    balance_interval_secs: u64,

    /// gRPC endpoint of the channel service, asked to restore persisted
    /// channels on startup
    #[arg(long, env = "WALLET_CHANNEL_SERVICE")]
    channel_service: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "WALLET_LOG_FILE")]
    log_file: Option<PathBuf>,
}

/// Writes every update to the log.
struct LogObserver;

impl Observer for LogObserver {
    fn id(&self) -> ObserverId {
        ObserverId(0)
    }

    fn update_state(&self, state: &str) {
        info!("channel state\n{state}");
    }

    fn update_balance(&self, balance: &str) {
        info!(%balance, "wallet balance");
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), std::io::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = File::options().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

fn parse_address(s: &str) -> Option<Address> {
    let bytes = decode_hex(s).ok()?;
    Some(Address(bytes.try_into().ok()?))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log_file.as_ref()) {
        eprintln!("Failed to open log file: {e}");
        std::process::exit(1);
    }

    info!("Starting wallet-service");
    info!("Listen address: {}", args.listen);
    info!("Network: {:?}", args.network);
    info!("Deployment: {:?}", args.deployment);

    let account = match load_private_key(&args.key) {
        Ok(account) => account,
        Err(e) => {
            error!("Failed to load private key: {}", e);
            std::process::exit(1);
        }
    };
    let deployment = match Deployment::load(&args.deployment) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to load deployment: {}", e);
            std::process::exit(1);
        }
    };
    let Some(peer) = parse_address(&args.peer) else {
        error!("Invalid peer address {:?}", args.peer);
        std::process::exit(1);
    };

    let gate = SigningGate::new(account, args.network, &deployment);
    info!("Wallet address: {}", gate.on_chain_address());

    let register = match AssetRegister::new(
        vec![Asset::Native(NativeAsset::coin())],
        vec!["CKBytes".to_string()],
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to create asset register: {}", e);
            std::process::exit(1);
        }
    };
    let parties = [
        *gate.on_chain_address(),
        OnChainAddress::new(peer, args.network),
    ];
    let notifier = Arc::new(ObserverNotifier::new(ChannelFormatter::new(parties, register)));
    if let Err(e) = notifier.register(Arc::new(LogObserver)) {
        error!("Failed to register log observer: {}", e);
        std::process::exit(1);
    }

    let poller = match &args.ckb_rpc {
        Some(url) => match CkbIndexerSource::new(url, DEFAULT_TIMEOUT) {
            Ok(source) => {
                info!("Polling balance from {}", url);
                Some(BalancePoller::spawn(
                    source,
                    *gate.on_chain_address(),
                    notifier.clone(),
                    Duration::from_secs(args.balance_interval_secs.max(1)),
                ))
            }
            Err(e) => {
                error!("Failed to create indexer client: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let service = Arc::new(WalletService::new(gate, Arc::new(AppRegistry::default())));
    if let Err(e) = service.bind_update_sink(notifier) {
        error!("Failed to bind update sink: {}", e);
        std::process::exit(1);
    }

    let server = match WalletServer::bind(args.listen, service.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    info!("Wallet service ready on {}", server.local_addr());

    // The channel service calls back into the wallet while restoring, so
    // this runs next to the server.
    let payments = match &args.channel_service {
        Some(uri) => {
            let rpc = match ChannelServiceConnector::new(uri) {
                Ok(connector) => ResilientClient::dial(connector, ReconnectPolicy::default()).await,
                Err(e) => Err(e),
            };
            match rpc {
                Ok(rpc) => {
                    let client = Arc::new(PaymentClient::new(rpc, service.clone(), Role::Proposer));
                    let restoring = client.clone();
                    tokio::spawn(async move {
                        if let Err(e) = restoring.restore().await {
                            error!("Failed to restore channels: {}", e);
                        }
                    });
                    Some(client)
                }
                Err(e) => {
                    error!("Failed to reach channel service at {}: {}", uri, e);
                    std::process::exit(1);
                }
            }
        }
        None => None,
    };

    let served = server.serve_until(shutdown_signal()).await;
    if let Some(poller) = poller {
        poller.stop().await;
    }
    drop(payments);
    if let Err(e) = served {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    info!("Wallet service exited");
}
