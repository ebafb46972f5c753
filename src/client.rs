//! Client side connection to a peer service that survives transient network
//! failures.
//!
//! A [ResilientClient] owns one connection handle and a monitor task. The
//! monitor checks the connection on a fixed interval and replaces the handle
//! when it is broken. Callers always fetch the current handle through
//! [ResilientClient::handle] right before using it.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    net::TcpStream,
    sync::watch,
    time::{interval, timeout, MissedTickBehavior},
};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::{
    config::ReconnectPolicy, error::TransportError,
    perunchannel::channel_service_client::ChannelServiceClient,
    perunwallet::wallet_service_client::WalletServiceClient,
};

/// Health of a connection as seen by its [Connector].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

/// Dials connections and reports their health.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Handle, TransportError>;

    async fn connectivity(&self, handle: &Self::Handle) -> Connectivity;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Reconnecting,
}

struct Shared<C: Connector> {
    connector: C,
    handle: ArcSwap<C::Handle>,
    state: Mutex<ClientState>,
    reconnects: AtomicU64,
}

impl<C: Connector> Shared<C> {
    fn set_state(&self, state: ClientState) {
        *self.state.lock() = state;
    }

    async fn check(&self) {
        let state = *self.state.lock();
        let current = self.handle.load_full();

        match state {
            ClientState::Connected => {
                if self.connector.connectivity(&current).await != Connectivity::TransientFailure {
                    return;
                }
                warn!("connection lost, reconnecting");
                self.set_state(ClientState::Reconnecting);
            }
            ClientState::Reconnecting => {
                if self.connector.connectivity(&current).await != Connectivity::TransientFailure {
                    info!("connection recovered");
                    self.set_state(ClientState::Connected);
                    return;
                }
            }
        }

        match self.connector.connect().await {
            Ok(handle) => {
                self.handle.store(Arc::new(handle));
                self.reconnects.fetch_add(1, Ordering::Relaxed);
                self.set_state(ClientState::Connected);
                info!("reconnected");
            }
            Err(e) => debug!(error = %e, "redial failed"),
        }
    }
}

/// Connection handle kept alive across reconnects.
///
/// Dropping the client stops its monitor.
pub struct ResilientClient<C: Connector> {
    shared: Arc<Shared<C>>,
    stop: watch::Sender<bool>,
}

impl<C: Connector> core::fmt::Debug for ResilientClient<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("state", &self.state())
            .field("reconnects", &self.reconnects())
            .finish()
    }
}

impl<C: Connector> ResilientClient<C> {
    /// Dials once and starts monitoring. Fails if the first dial fails.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn dial(connector: C, policy: ReconnectPolicy) -> Result<Self, TransportError> {
        let handle = connector.connect().await?;
        let shared = Arc::new(Shared {
            connector,
            handle: ArcSwap::from_pointee(handle),
            state: Mutex::new(ClientState::Connected),
            reconnects: AtomicU64::new(0),
        });
        let (stop, stopped) = watch::channel(false);
        tokio::spawn(monitor(shared.clone(), policy.interval, stopped));

        Ok(Self { shared, stop })
    }

    pub fn handle(&self) -> Arc<C::Handle> {
        self.shared.handle.load_full()
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.lock()
    }

    /// Number of times the handle was replaced.
    pub fn reconnects(&self) -> u64 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl<C: Connector> Drop for ResilientClient<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn monitor<C: Connector>(
    shared: Arc<Shared<C>>,
    period: Duration,
    mut stopped: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately, right after the initial dial.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stopped.changed() => break,
            _ = ticker.tick() => shared.check().await,
        }
    }
    debug!("connection monitor stopped");
}

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

/// Generated gRPC client that runs over a tonic [Channel].
pub trait GrpcClient: Send + Sync + 'static {
    fn from_channel(channel: Channel) -> Self;
}

impl GrpcClient for WalletServiceClient<Channel> {
    fn from_channel(channel: Channel) -> Self {
        WalletServiceClient::new(channel)
    }
}

impl GrpcClient for ChannelServiceClient<Channel> {
    fn from_channel(channel: Channel) -> Self {
        ChannelServiceClient::new(channel)
    }
}

/// Dials a gRPC service. Health is checked with a plain TCP connect to the
/// endpoint's authority.
pub struct GrpcConnector<T> {
    endpoint: Endpoint,
    authority: String,
    client: PhantomData<fn() -> T>,
}

/// Dials the wallet service.
pub type WalletConnector = GrpcConnector<WalletServiceClient<Channel>>;

/// Dials the channel service.
pub type ChannelServiceConnector = GrpcConnector<ChannelServiceClient<Channel>>;

impl<T> core::fmt::Debug for GrpcConnector<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GrpcConnector")
            .field("authority", &self.authority)
            .finish()
    }
}

impl<T> GrpcConnector<T> {
    /// `uri` like `http://127.0.0.1:50051`.
    pub fn new(uri: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(uri.to_string());
        let endpoint = Endpoint::from_shared(uri.to_string()).map_err(|_| invalid())?;
        let authority = endpoint
            .uri()
            .authority()
            .map(|a| a.to_string())
            .ok_or_else(invalid)?;
        Ok(Self {
            endpoint: endpoint.connect_timeout(HEALTH_CHECK_TIMEOUT * 4),
            authority,
            client: PhantomData,
        })
    }
}

#[async_trait]
impl<T: GrpcClient> Connector for GrpcConnector<T> {
    type Handle = T;

    async fn connect(&self) -> Result<T, TransportError> {
        let channel = self.endpoint.connect().await?;
        Ok(T::from_channel(channel))
    }

    async fn connectivity(&self, _handle: &T) -> Connectivity {
        match timeout(HEALTH_CHECK_TIMEOUT, TcpStream::connect(&self.authority)).await {
            Ok(Ok(_)) => Connectivity::Ready,
            _ => Connectivity::TransientFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Debug)]
    struct MockHandle {
        id: usize,
        healthy: Arc<AtomicBool>,
    }

    /// Hands out numbered handles. Each dial first consumes one of
    /// `failures`, if any are left.
    #[derive(Default)]
    struct MockConnector {
        dials: Arc<AtomicUsize>,
        failures: Arc<AtomicUsize>,
        healthy: Mutex<Vec<Arc<AtomicBool>>>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Handle = MockHandle;

        async fn connect(&self) -> Result<MockHandle, TransportError> {
            let id = self.dials.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(TransportError::InvalidEndpoint("mock".into()));
            }
            let healthy = Arc::new(AtomicBool::new(true));
            self.healthy.lock().push(healthy.clone());
            Ok(MockHandle { id, healthy })
        }

        async fn connectivity(&self, handle: &MockHandle) -> Connectivity {
            if handle.healthy.load(Ordering::SeqCst) {
                Connectivity::Ready
            } else {
                Connectivity::TransientFailure
            }
        }
    }

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            interval: Duration::from_secs(1),
        }
    }

    async fn ticks(n: u64) {
        tokio::time::sleep(Duration::from_millis(n * 1000 + 100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_connection_is_left_alone() {
        let connector = MockConnector::default();
        let dials = connector.dials.clone();
        let client = ResilientClient::dial(connector, policy()).await.unwrap();

        ticks(10).await;
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(client.handle().id, 0);
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn swaps_exactly_once_after_failed_redials() {
        let connector = MockConnector::default();
        let dials = connector.dials.clone();
        let failures = connector.failures.clone();
        let client = ResilientClient::dial(connector, policy()).await.unwrap();

        failures.store(3, Ordering::SeqCst);
        client.handle().healthy.store(false, Ordering::SeqCst);

        ticks(2).await;
        assert_eq!(client.state(), ClientState::Reconnecting);
        assert_eq!(client.handle().id, 0);

        ticks(10).await;
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.reconnects(), 1);
        assert_eq!(dials.load(Ordering::SeqCst), 5);

        let handle = client.handle();
        assert_eq!(handle.id, 4);
        assert!(handle.healthy.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_handle_is_kept() {
        let connector = MockConnector::default();
        let failures = connector.failures.clone();
        let client = ResilientClient::dial(connector, policy()).await.unwrap();

        failures.store(usize::MAX, Ordering::SeqCst);
        let first = client.handle();
        first.healthy.store(false, Ordering::SeqCst);
        ticks(3).await;
        assert_eq!(client.state(), ClientState::Reconnecting);

        first.healthy.store(true, Ordering::SeqCst);
        ticks(1).await;
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.handle().id, 0);
        assert_eq!(client.reconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_monitor_does_not_redial() {
        let connector = MockConnector::default();
        let dials = connector.dials.clone();
        let client = ResilientClient::dial(connector, policy()).await.unwrap();

        client.stop();
        client.handle().healthy.store(false, Ordering::SeqCst);
        ticks(5).await;
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn first_dial_failure_is_returned() {
        let connector = MockConnector::default();
        connector.failures.store(1, Ordering::SeqCst);
        assert!(ResilientClient::dial(connector, policy()).await.is_err());
    }

    #[test]
    fn grpc_connector_needs_authority() {
        assert!(WalletConnector::new("http://127.0.0.1:50051").is_ok());
        assert!(matches!(
            ChannelServiceConnector::new("not a uri"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn grpc_connector_reports_unreachable_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = ChannelServiceConnector::new(&format!("http://{addr}")).unwrap();
        // A lazily connected handle is enough to ask about health.
        let handle = ChannelServiceClient::new(connector.endpoint.connect_lazy());

        assert_eq!(connector.connectivity(&handle).await, Connectivity::Ready);
        drop(listener);
        assert_eq!(
            connector.connectivity(&handle).await,
            Connectivity::TransientFailure
        );
    }
}
