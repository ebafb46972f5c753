//! Periodic refresh of the wallet's on-chain balance.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{address::OnChainAddress, observer::ObserverNotifier, types::U256};

/// Where balances come from, usually a chain indexer.
#[async_trait]
pub trait BalanceSource: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;

    async fn balance(&self, address: &OnChainAddress) -> Result<U256, Self::Error>;
}

/// Polls a [BalanceSource] and pushes every result to the observers.
#[derive(Debug)]
pub struct BalancePoller {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BalancePoller {
    /// Starts polling right away. Must be called from within a tokio runtime.
    pub fn spawn<S: BalanceSource>(
        source: S,
        address: OnChainAddress,
        notifier: Arc<ObserverNotifier>,
        period: Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => match source.balance(&address).await {
                        Ok(balance) => notifier.notify_balance(balance),
                        Err(e) => warn!(%address, error = %e, "polling balance"),
                    },
                }
            }
            debug!(%address, "balance poller stopped");
        });
        Self { stop, task }
    }

    /// Stops polling and waits for the loop to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::Network,
        channel::{Asset, AssetRegister, ChannelFormatter, NativeAsset},
        observer::{Observer, ObserverId},
        types::Address,
    };
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    /// Returns 1, 2, 3, ... whole coins; fails on every fourth call.
    #[derive(Default)]
    struct Counting {
        calls: AtomicU64,
    }

    #[async_trait]
    impl BalanceSource for Counting {
        type Error = String;

        async fn balance(&self, _: &OnChainAddress) -> Result<U256, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n % 4 == 0 {
                return Err("indexer down".into());
            }
            Ok(U256::from(n * 100_000_000))
        }
    }

    struct Balances(UnboundedSender<String>);

    impl Observer for Balances {
        fn id(&self) -> ObserverId {
            ObserverId(1)
        }

        fn update_state(&self, _: &str) {}

        fn update_balance(&self, balance: &str) {
            let _ = self.0.send(balance.to_string());
        }
    }

    fn setup() -> (Arc<ObserverNotifier>, OnChainAddress) {
        let coin = Asset::Native(NativeAsset::coin());
        let register = AssetRegister::new(vec![coin], vec!["CKBytes".into()]).unwrap();
        let me = OnChainAddress::new(Address([1; 20]), Network::Testnet);
        let peer = OnChainAddress::new(Address([2; 20]), Network::Testnet);
        let notifier = ObserverNotifier::new(ChannelFormatter::new([me, peer], register));
        (Arc::new(notifier), me)
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_each_successful_poll() {
        let (notifier, me) = setup();
        let (tx, mut rx) = unbounded_channel();
        notifier.register(Arc::new(Balances(tx))).unwrap();

        let poller = BalancePoller::spawn(
            Counting::default(),
            me,
            notifier.clone(),
            Duration::from_secs(5),
        );

        assert_eq!(rx.recv().await.unwrap(), "1.00 CKBytes");
        assert_eq!(rx.recv().await.unwrap(), "2.00 CKBytes");
        assert_eq!(rx.recv().await.unwrap(), "3.00 CKBytes");
        // The fourth poll fails and is skipped.
        assert_eq!(rx.recv().await.unwrap(), "5.00 CKBytes");

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_polling() {
        let (notifier, me) = setup();
        let source = Arc::new(Counting::default());

        struct Shared(Arc<Counting>);

        #[async_trait]
        impl BalanceSource for Shared {
            type Error = String;

            async fn balance(&self, a: &OnChainAddress) -> Result<U256, String> {
                self.0.balance(a).await
            }
        }

        let poller = BalancePoller::spawn(
            Shared(source.clone()),
            me,
            notifier,
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_millis(2500)).await;
        poller.stop().await;

        let calls = source.calls.load(Ordering::SeqCst);
        assert_eq!(calls, 3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }
}
