//! Fan-out of channel state and wallet balance changes to local observers.
//!
//! Observers receive preformatted strings. Every registration gets its own
//! queue and delivery task, so callbacks never run under the notifier lock
//! and may register or deregister observers themselves.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use crate::{
    channel::{ChannelFormatter, State},
    error::ServiceError,
    types::U256,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Receives formatted updates. Called from a tokio task.
pub trait Observer: Send + Sync {
    fn id(&self) -> ObserverId;
    fn update_state(&self, state: &str);
    fn update_balance(&self, balance: &str);
}

/// Told about every accepted state update of the channel.
pub trait UpdateSink: Send + Sync {
    fn on_update(&self, from: Option<&State>, to: &State);

    /// The channel is gone, forget what was said about it.
    fn on_close(&self) {}
}

#[derive(Debug, Clone)]
enum Event {
    State(Arc<str>),
    Balance(Arc<str>),
}

struct Subscription {
    id: ObserverId,
    tx: UnboundedSender<Event>,
}

#[derive(Default)]
struct Inner {
    subscriptions: Vec<Subscription>,
    last_state: Option<Arc<str>>,
    last_balance: Option<Arc<str>>,
}

pub struct ObserverNotifier {
    formatter: ChannelFormatter,
    inner: Mutex<Inner>,
}

impl core::fmt::Debug for ObserverNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObserverNotifier")
            .field("observers", &self.inner.lock().subscriptions.len())
            .finish()
    }
}

async fn deliver(observer: Arc<dyn Observer>, mut rx: UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::State(s) => observer.update_state(&s),
            Event::Balance(b) => observer.update_balance(&b),
        }
    }
    trace!(id = observer.id().0, "observer delivery finished");
}

impl ObserverNotifier {
    pub fn new(formatter: ChannelFormatter) -> Self {
        Self {
            formatter,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn formatter(&self) -> &ChannelFormatter {
        &self.formatter
    }

    /// Adds an observer and sends it the latest state and balance, if any.
    ///
    /// The delivery task runs on the current tokio runtime, registering from
    /// outside one fails with [ServiceError::NoRuntime].
    pub fn register(&self, observer: Arc<dyn Observer>) -> Result<(), ServiceError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ServiceError::NoRuntime)?;
        let (tx, rx) = unbounded_channel();
        let id = observer.id();

        let mut inner = self.inner.lock();
        if let Some(state) = &inner.last_state {
            let _ = tx.send(Event::State(state.clone()));
        }
        if let Some(balance) = &inner.last_balance {
            let _ = tx.send(Event::Balance(balance.clone()));
        }
        inner.subscriptions.push(Subscription { id, tx });
        drop(inner);

        runtime.spawn(deliver(observer, rx));
        debug!(id = id.0, "observer registered");
        Ok(())
    }

    /// Removes the observer with the given id. Updates already queued for it
    /// are still delivered.
    pub fn deregister(&self, id: ObserverId) {
        let mut inner = self.inner.lock();
        if let Some(i) = inner.subscriptions.iter().position(|s| s.id == id) {
            inner.subscriptions.swap_remove(i);
            debug!(id = id.0, "observer deregistered");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    pub fn notify_state(&self, state: &State) {
        let formatted: Arc<str> = self.formatter.format_state(state).into();
        let mut inner = self.inner.lock();
        inner.last_state = Some(formatted.clone());
        broadcast(&mut inner, Event::State(formatted));
    }

    pub fn notify_balance(&self, balance: U256) {
        let formatted: Arc<str> = self.formatter.format_balance(balance).into();
        let mut inner = self.inner.lock();
        inner.last_balance = Some(formatted.clone());
        broadcast(&mut inner, Event::Balance(formatted));
    }

    /// Drops the state snapshot so new observers do not see a closed channel.
    pub fn forget_state(&self) {
        self.inner.lock().last_state = None;
    }
}

fn broadcast(inner: &mut Inner, event: Event) {
    // A closed queue means the delivery task is gone, drop the subscription.
    inner
        .subscriptions
        .retain(|sub| sub.tx.send(event.clone()).is_ok());
}

impl UpdateSink for ObserverNotifier {
    fn on_update(&self, _from: Option<&State>, to: &State) {
        self.notify_state(to);
    }

    fn on_close(&self) {
        self.forget_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::{Network, OnChainAddress},
        channel::{Allocation, App, Asset, AssetRegister, NativeAsset},
        types::{Address, Hash},
    };
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, PartialEq)]
    enum Seen {
        State(String),
        Balance(String),
    }

    struct Recorder {
        id: ObserverId,
        tx: UnboundedSender<Seen>,
    }

    impl Observer for Recorder {
        fn id(&self) -> ObserverId {
            self.id
        }

        fn update_state(&self, state: &str) {
            let _ = self.tx.send(Seen::State(state.to_string()));
        }

        fn update_balance(&self, balance: &str) {
            let _ = self.tx.send(Seen::Balance(balance.to_string()));
        }
    }

    fn recorder(id: u64) -> (Arc<Recorder>, UnboundedReceiver<Seen>) {
        let (tx, rx) = unbounded_channel();
        (
            Arc::new(Recorder {
                id: ObserverId(id),
                tx,
            }),
            rx,
        )
    }

    fn notifier() -> ObserverNotifier {
        let coin = Asset::Native(NativeAsset::coin());
        let register = AssetRegister::new(vec![coin], vec!["CKBytes".into()]).unwrap();
        ObserverNotifier::new(ChannelFormatter::new(
            [
                OnChainAddress::new(Address([1; 20]), Network::Testnet),
                OnChainAddress::new(Address([2; 20]), Network::Testnet),
            ],
            register,
        ))
    }

    fn state(version: u64) -> State {
        State {
            id: Hash([3; 32]),
            version,
            is_final: false,
            allocation: Allocation::new(vec![Asset::Native(NativeAsset::coin())]),
            app: App::None,
            data: vec![],
        }
    }

    async fn nothing_arrives(rx: &mut UnboundedReceiver<Seen>) -> bool {
        // A closed queue counts as silence: the delivery task of a
        // deregistered observer drops it.
        !matches!(timeout(Duration::from_millis(50), rx.recv()).await, Ok(Some(_)))
    }

    #[tokio::test]
    async fn register_without_snapshot_sends_nothing() {
        let n = notifier();
        let (obs, mut rx) = recorder(1);
        n.register(obs).unwrap();
        assert!(nothing_arrives(&mut rx).await);
    }

    #[tokio::test]
    async fn register_delivers_latest_state_once() {
        let n = notifier();
        n.notify_state(&state(1));
        n.notify_state(&state(2));

        let (obs, mut rx) = recorder(1);
        n.register(obs).unwrap();

        match rx.recv().await.unwrap() {
            Seen::State(s) => assert!(s.ends_with("Version: 2"), "{s}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(nothing_arrives(&mut rx).await);
    }

    #[tokio::test]
    async fn register_delivers_balance_snapshot() {
        let n = notifier();
        n.notify_balance(U256::from(250_000_000u64));

        let (obs, mut rx) = recorder(1);
        n.register(obs).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Seen::Balance("2.50 CKBytes".into())
        );
    }

    #[tokio::test]
    async fn updates_reach_all_observers_in_order() {
        let n = notifier();
        let (a, mut rx_a) = recorder(1);
        let (b, mut rx_b) = recorder(2);
        n.register(a).unwrap();
        n.register(b).unwrap();

        n.notify_state(&state(1));
        n.notify_balance(U256::zero());

        for rx in [&mut rx_a, &mut rx_b] {
            assert!(matches!(rx.recv().await.unwrap(), Seen::State(_)));
            assert_eq!(rx.recv().await.unwrap(), Seen::Balance("0.00 CKBytes".into()));
        }
    }

    #[tokio::test]
    async fn deregistered_observer_gets_nothing() {
        let n = notifier();
        let (a, mut rx_a) = recorder(1);
        let (b, mut rx_b) = recorder(2);
        n.register(a).unwrap();
        n.register(b).unwrap();

        n.deregister(ObserverId(1));
        assert_eq!(n.observer_count(), 1);
        n.notify_state(&state(5));

        assert!(matches!(rx_b.recv().await.unwrap(), Seen::State(_)));
        assert!(nothing_arrives(&mut rx_a).await);
    }

    #[tokio::test]
    async fn forgotten_state_is_not_replayed() {
        let n = notifier();
        n.on_update(None, &state(1));
        n.on_close();

        let (obs, mut rx) = recorder(1);
        n.register(obs).unwrap();
        assert!(nothing_arrives(&mut rx).await);
    }

    struct Reentrant {
        notifier: Arc<ObserverNotifier>,
        tx: UnboundedSender<usize>,
    }

    impl Observer for Reentrant {
        fn id(&self) -> ObserverId {
            ObserverId(42)
        }

        fn update_state(&self, _: &str) {
            self.notifier.deregister(self.id());
            let _ = self.tx.send(self.notifier.observer_count());
        }

        fn update_balance(&self, _: &str) {}
    }

    #[tokio::test]
    async fn callback_may_deregister_itself() {
        let n = Arc::new(notifier());
        let (tx, mut rx) = unbounded_channel();
        n.register(Arc::new(Reentrant {
            notifier: n.clone(),
            tx,
        }))
        .unwrap();

        n.notify_state(&state(1));
        assert_eq!(rx.recv().await, Some(0));
    }

    #[test]
    fn register_outside_runtime_fails() {
        let n = notifier();
        let (obs, _rx) = recorder(1);
        assert!(matches!(n.register(obs), Err(ServiceError::NoRuntime)));
        assert_eq!(n.observer_count(), 0);
    }

    #[tokio::test]
    async fn deregistered_observer_is_dropped() {
        let n = notifier();
        let (a, mut rx_a) = recorder(1);
        n.register(a).unwrap();
        n.deregister(ObserverId(1));

        // The recorder goes away with its delivery task.
        assert_eq!(rx_a.recv().await, None);
    }
}
