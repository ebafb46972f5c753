//! The gRPC wallet service called by the channel service.
//!
//! Every request that commits the key passes through here: proposals are
//! verified before a nonce share is handed out, state updates are decoded
//! before they reach the cache and the observers.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{debug, info, warn};

use crate::{
    cache::StateCache,
    channel::{decode_state, verify_open_channel_request, AppResolver, NonceShare, State},
    error::{CodecError, ServiceError, SigningError},
    gate::SigningGate,
    observer::UpdateSink,
    perunwallet::{
        open_channel_response, sign_message_response, sign_transaction_response,
        wallet_service_server::{WalletService as WalletServiceApi, WalletServiceServer},
        GetAssetsRequest, GetAssetsResponse, OpenChannelRequest, OpenChannelResponse, Rejected,
        SignMessageRequest, SignMessageResponse, SignTransactionRequest, SignTransactionResponse,
        UpdateNotificationRequest, UpdateNotificationResponse,
    },
    types::Hash,
};

fn signing_status(e: SigningError) -> Status {
    match e {
        SigningError::MalformedTransaction(_) => Status::invalid_argument(e.to_string()),
        _ => Status::permission_denied(e.to_string()),
    }
}

fn codec_status(e: CodecError) -> Status {
    Status::invalid_argument(e.to_string())
}

pub struct WalletService {
    gate: SigningGate,
    cache: StateCache,
    apps: Arc<dyn AppResolver>,
    sink: OnceLock<Arc<dyn UpdateSink>>,
    // Held from the version check until the sink has been told, so the cache
    // and the sink see updates in the same order.
    updates: Mutex<()>,
}

impl core::fmt::Debug for WalletService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WalletService")
            .field("gate", &self.gate)
            .field("cache", &self.cache)
            .field("sink_bound", &self.sink.get().is_some())
            .finish()
    }
}

impl WalletService {
    pub fn new(gate: SigningGate, apps: Arc<dyn AppResolver>) -> Self {
        Self {
            gate,
            cache: StateCache::new(),
            apps,
            sink: OnceLock::new(),
            updates: Mutex::new(()),
        }
    }

    pub fn gate(&self) -> &SigningGate {
        &self.gate
    }

    /// Sets who is told about accepted state updates. Can only be done once.
    pub fn bind_update_sink(&self, sink: Arc<dyn UpdateSink>) -> Result<(), ServiceError> {
        self.sink.set(sink).map_err(|_| ServiceError::AlreadyBound)
    }

    /// Latest accepted state, if any.
    pub fn state(&self) -> Option<State> {
        self.cache.get()
    }

    /// Drops the cached state of channel `id`. Returns whether it was cached.
    pub fn channel_closed(&self, id: &Hash) -> bool {
        let _updates = self.updates.lock();
        match self.cache.get() {
            Some(state) if state.id == *id => {
                self.cache.clear();
                if let Some(sink) = self.sink.get() {
                    sink.on_close();
                }
                info!(channel = %id.to_hex(), "channel closed");
                true
            }
            _ => false,
        }
    }

    pub(crate) fn apps(&self) -> &dyn AppResolver {
        self.apps.as_ref()
    }

    /// Caches `next` and forwards it, unless it is older than what is cached
    /// for the same channel.
    pub(crate) fn apply_update(&self, next: State) {
        let _updates = self.updates.lock();
        let prev = self.cache.get();
        if let Some(prev) = &prev {
            if prev.id == next.id && next.version < prev.version {
                debug!(
                    cached = prev.version,
                    received = next.version,
                    "ignoring stale state"
                );
                return;
            }
        }

        self.cache.set(&next);
        match self.sink.get() {
            Some(sink) => sink.on_update(prev.as_ref(), &next),
            None => debug!("no update sink bound"),
        }
    }
}

#[tonic::async_trait]
impl WalletServiceApi for WalletService {
    async fn open_channel(
        &self,
        request: Request<OpenChannelRequest>,
    ) -> Result<Response<OpenChannelResponse>, Status> {
        let msg = match verify_open_channel_request(request.get_ref()) {
            Ok(()) => {
                let nonce: NonceShare = rand::random();
                info!("accepted channel proposal");
                open_channel_response::Msg::NonceShare(nonce.0.to_vec())
            }
            Err(e) => {
                warn!(reason = %e, "rejected channel proposal");
                open_channel_response::Msg::Rejected(Rejected {
                    reason: e.to_string(),
                })
            }
        };
        Ok(Response::new(OpenChannelResponse { msg: Some(msg) }))
    }

    async fn update_notification(
        &self,
        request: Request<UpdateNotificationRequest>,
    ) -> Result<Response<UpdateNotificationResponse>, Status> {
        let wire = request
            .into_inner()
            .state
            .ok_or_else(|| Status::invalid_argument("missing state"))?;
        let state = decode_state(&wire, self.apps.as_ref()).map_err(codec_status)?;
        debug!(
            channel = %state.id.to_hex(),
            version = state.version,
            is_final = state.is_final,
            "update notification"
        );

        self.apply_update(state);
        Ok(Response::new(UpdateNotificationResponse { accepted: true }))
    }

    async fn sign_message(
        &self,
        request: Request<SignMessageRequest>,
    ) -> Result<Response<SignMessageResponse>, Status> {
        let sig = self
            .gate
            .sign_message(&request.get_ref().data)
            .map_err(signing_status)?;
        Ok(Response::new(SignMessageResponse {
            msg: Some(sign_message_response::Msg::Signature(sig.0.to_vec())),
        }))
    }

    async fn sign_transaction(
        &self,
        request: Request<SignTransactionRequest>,
    ) -> Result<Response<SignTransactionResponse>, Status> {
        let signed = self
            .gate
            .sign_transaction(&request.get_ref().transaction)
            .map_err(signing_status)?;
        Ok(Response::new(SignTransactionResponse {
            msg: Some(sign_transaction_response::Msg::Transaction(signed)),
        }))
    }

    async fn get_assets(
        &self,
        _request: Request<GetAssetsRequest>,
    ) -> Result<Response<GetAssetsResponse>, Status> {
        Err(Status::unimplemented(ServiceError::NotImplemented.to_string()))
    }
}

/// Running gRPC server of a [WalletService].
#[derive(Debug)]
pub struct WalletServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

impl WalletServer {
    /// Binds `addr` and starts serving. Port `0` picks a free port, see
    /// [WalletServer::local_addr].
    pub async fn bind(addr: SocketAddr, service: Arc<WalletService>) -> Result<Self, ServiceError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, stopped) = oneshot::channel::<()>();

        let router = Server::builder().add_service(WalletServiceServer::from_arc(service));
        let task = tokio::spawn(router.serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            async move {
                let _ = stopped.await;
            },
        ));
        info!(%local_addr, "wallet service listening");

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until `signal` completes, then shuts down gracefully.
    pub async fn serve_until<F: Future<Output = ()>>(self, signal: F) -> Result<(), ServiceError> {
        signal.await;
        self.shutdown().await
    }

    /// Stops accepting connections and waits for in-flight calls.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        info!(local_addr = %self.local_addr, "shutting down wallet service");
        let _ = self.shutdown.send(());
        self.task.await??;
        info!("wallet service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::Network,
        channel::{AppRegistry, Asset, NativeAsset},
        config::Deployment,
        perunwire,
        channel::decode_state,
        sig::{hash_data, recover_signer, Account},
        types::{Signature, U256},
    };
    use rand::Rng;
    use tonic::Code;

    #[derive(Default)]
    struct Recording {
        updates: Mutex<Vec<(Option<u64>, u64)>>,
        closed: Mutex<usize>,
    }

    impl UpdateSink for Recording {
        fn on_update(&self, from: Option<&State>, to: &State) {
            self.updates
                .lock()
                .push((from.map(|s| s.version), to.version));
        }

        fn on_close(&self) {
            *self.closed.lock() += 1;
        }
    }

    fn service() -> WalletService {
        let deployment = Deployment::from_json(&format!(
            r#"{{"default_lock_script": {{"code_hash": "0x{}", "hash_type": "type"}}}}"#,
            "33".repeat(32)
        ))
        .unwrap();
        let gate = SigningGate::new(
            Account::from_bytes(&[9; 32]).unwrap(),
            Network::Testnet,
            &deployment,
        );
        WalletService::new(gate, Arc::new(AppRegistry::default()))
    }

    fn wire_state(id: u8, version: u64) -> perunwire::State {
        perunwire::State {
            id: vec![id; 32],
            version,
            app: vec![],
            allocation: Some(perunwire::Allocation {
                assets: vec![vec![0x01]],
                balances: Some(perunwire::Balances {
                    balances: vec![perunwire::Balance {
                        balance: vec![vec![0x05], vec![0x07]],
                    }],
                }),
                locked: vec![],
            }),
            data: vec![],
            is_final: false,
        }
    }

    async fn notify(svc: &WalletService, state: perunwire::State) -> Result<bool, Status> {
        svc.update_notification(Request::new(UpdateNotificationRequest {
            state: Some(state),
        }))
        .await
        .map(|r| r.into_inner().accepted)
    }

    #[tokio::test]
    async fn update_is_cached_and_forwarded() {
        let svc = service();
        let sink = Arc::new(Recording::default());
        svc.bind_update_sink(sink.clone()).unwrap();

        assert!(notify(&svc, wire_state(1, 1)).await.unwrap());
        assert!(notify(&svc, wire_state(1, 2)).await.unwrap());

        let cached = svc.state().unwrap();
        assert_eq!(cached.version, 2);
        assert_eq!(cached.allocation.assets, vec![Asset::Native(NativeAsset::coin())]);
        assert_eq!(cached.allocation.balances, vec![[U256::from(5), U256::from(7)]]);
        assert_eq!(*sink.updates.lock(), vec![(None, 1), (Some(1), 2)]);
    }

    #[tokio::test]
    async fn stale_update_is_acknowledged_but_dropped() {
        let svc = service();
        let sink = Arc::new(Recording::default());
        svc.bind_update_sink(sink.clone()).unwrap();

        notify(&svc, wire_state(1, 5)).await.unwrap();
        assert!(notify(&svc, wire_state(1, 3)).await.unwrap());

        assert_eq!(svc.state().unwrap().version, 5);
        assert_eq!(sink.updates.lock().len(), 1);
    }

    #[tokio::test]
    async fn malformed_update_is_invalid_argument() {
        let svc = service();
        let mut state = wire_state(1, 1);
        state.id.truncate(31);
        assert_eq!(notify(&svc, state).await.unwrap_err().code(), Code::InvalidArgument);

        let missing = svc
            .update_notification(Request::new(UpdateNotificationRequest { state: None }))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), Code::InvalidArgument);
        assert!(svc.state().is_none());
    }

    #[tokio::test]
    async fn sink_binds_once() {
        let svc = service();
        svc.bind_update_sink(Arc::new(Recording::default())).unwrap();
        assert!(matches!(
            svc.bind_update_sink(Arc::new(Recording::default())),
            Err(ServiceError::AlreadyBound)
        ));
    }

    #[tokio::test]
    async fn closing_clears_only_matching_channel() {
        let svc = service();
        let sink = Arc::new(Recording::default());
        svc.bind_update_sink(sink.clone()).unwrap();
        notify(&svc, wire_state(1, 1)).await.unwrap();

        assert!(!svc.channel_closed(&Hash([2; 32])));
        assert!(svc.state().is_some());

        assert!(svc.channel_closed(&Hash([1; 32])));
        assert!(svc.state().is_none());
        assert_eq!(*sink.closed.lock(), 1);
    }

    #[tokio::test]
    async fn signs_messages_with_wallet_key() {
        let svc = service();
        let resp = svc
            .sign_message(Request::new(SignMessageRequest {
                pubkey: svc.gate().public_key(),
                data: b"state".to_vec(),
            }))
            .await
            .unwrap()
            .into_inner();

        let Some(sign_message_response::Msg::Signature(sig)) = resp.msg else {
            panic!("no signature");
        };
        let sig = Signature::from_slice(&sig).unwrap();
        assert_eq!(
            recover_signer(hash_data(b"state"), sig).unwrap(),
            svc.gate().address()
        );
    }

    #[tokio::test]
    async fn bad_transaction_is_invalid_argument() {
        let status = service()
            .sign_transaction(Request::new(SignTransactionRequest {
                identifier: vec![],
                transaction: b"[]".to_vec(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn get_assets_is_unimplemented() {
        let status = service()
            .get_assets(Request::new(GetAssetsRequest { pubkey: vec![] }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
        assert_eq!(status.message(), "not implemented");
    }

    #[tokio::test]
    async fn open_channel_rejection_carries_reason() {
        let resp = service()
            .open_channel(Request::new(OpenChannelRequest { proposal: None }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            resp.msg,
            Some(open_channel_response::Msg::Rejected(Rejected {
                reason: "missing proposal".into()
            }))
        );
    }

    #[test]
    fn concurrent_updates_keep_highest_version() {
        let svc = Arc::new(service());
        let sink = Arc::new(Recording::default());
        svc.bind_update_sink(sink.clone()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = svc.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    let mut highest = 0;
                    for _ in 0..200 {
                        let version = rng.gen_range(1..1000);
                        highest = highest.max(version);
                        let state =
                            decode_state(&wire_state(1, version), &AppRegistry::default())
                                .unwrap();
                        svc.apply_update(state);
                    }
                    highest
                })
            })
            .collect();
        let highest = handles.into_iter().map(|h| h.join().unwrap()).max().unwrap();

        assert_eq!(svc.state().unwrap().version, highest);
        let updates = sink.updates.lock();
        assert_eq!(updates.last().map(|u| u.1), Some(highest));
        // Every forwarded update starts where the previous one ended.
        for pair in updates.windows(2) {
            assert_eq!(pair[1].0, Some(pair[0].1));
            assert!(pair[1].1 >= pair[0].1);
        }
    }

    #[test]
    fn close_and_update_do_not_interleave() {
        let svc = Arc::new(service());
        let sink = Arc::new(Recording::default());
        svc.bind_update_sink(sink.clone()).unwrap();
        let id = Hash([1; 32]);

        let writer = {
            let svc = svc.clone();
            std::thread::spawn(move || {
                for version in 1..=500 {
                    let state = decode_state(&wire_state(1, version), &AppRegistry::default())
                        .unwrap();
                    svc.apply_update(state);
                }
            })
        };
        let mut closed = 0;
        for _ in 0..500 {
            if svc.channel_closed(&id) {
                closed += 1;
            }
        }
        writer.join().unwrap();

        assert_eq!(*sink.closed.lock(), closed);
        // Each close empties a filled cache, each update from nothing fills
        // an empty one.
        let fills = sink.updates.lock().iter().filter(|u| u.0.is_none()).count();
        let filled = usize::from(svc.state().is_some());
        assert_eq!(fills, closed + filled);
    }
}
