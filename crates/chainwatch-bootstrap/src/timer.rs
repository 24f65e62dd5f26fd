//! Interval timer: a tokio task that ticks the registry's interval
//! subscriptions and polls the due ones.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use chainwatch_tasks::SubscriptionRegistry;

use crate::collaborators::{ChainTransport, TaskRunner};

pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

pub struct IntervalTimer {
    period: Duration,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl IntervalTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            token: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Start ticking. No-op when already running.
    pub fn start(
        &mut self,
        registry: Arc<Mutex<SubscriptionRegistry>>,
        transport: Arc<dyn ChainTransport>,
        runner: Arc<dyn TaskRunner>,
    ) -> bool {
        if self.is_running() {
            return false;
        }
        let token = CancellationToken::new();
        let cancel = token.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        run_tick(&registry, transport.as_ref(), runner.as_ref()).await;
                    }
                }
            }
            tracing::debug!("interval timer stopped");
        });

        tracing::info!("interval timer started ({}s)", period.as_secs_f32());
        self.token = Some(token);
        self.handle = Some(handle);
        true
    }

    /// Cancel the loop. Returns `false` when it was not running.
    pub fn stop(&mut self) -> bool {
        self.handle = None;
        match self.token.take() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One tick: advance counters and poll every due subscription.
pub async fn run_tick(
    registry: &Mutex<SubscriptionRegistry>,
    transport: &dyn ChainTransport,
    runner: &dyn TaskRunner,
) -> usize {
    let due = registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .tick_intervals();
    let mut polled = 0usize;
    for sub in &due {
        let api = match transport.api(&sub.chain_id).await {
            Ok(api) => api,
            Err(e) => {
                tracing::warn!("interval {} skipped: {e}", sub.key());
                continue;
            }
        };
        match runner.poll_interval(&api, sub, sub.enable_os_notifications).await {
            Ok(()) => polled += 1,
            Err(e) => tracing::warn!("interval {} poll failed: {e}", sub.key()),
        }
    }
    if !due.is_empty() {
        tracing::debug!("tick: {polled}/{} interval(s) polled", due.len());
    }
    polled
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use chainwatch_core::types::{
        ChainId, ConnectionStatus, IntervalSetting, IntervalSubscription, SubscriptionTask,
        TaskCategory, TaskStatus,
    };

    use crate::collaborators::ApiHandle;
    use crate::error::TransportError;

    struct OneChain(&'static str);

    #[async_trait]
    impl ChainTransport for OneChain {
        async fn initialize(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn connect(&self, _chain: &str) -> Result<(), TransportError> {
            Ok(())
        }
        async fn connect_endpoint(&self, _chain: &str, _endpoint: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn set_endpoint(&self, _chain: &str, _endpoint: &str) {}
        async fn api(&self, chain: &str) -> Result<ApiHandle, TransportError> {
            if chain == self.0 {
                Ok(ApiHandle {
                    chain_id: chain.to_owned(),
                    endpoint: "mock".to_owned(),
                })
            } else {
                Err(TransportError::NotConnected(chain.to_owned()))
            }
        }
        async fn close(&self, _chain: &str) {}
        async fn close_all(&self) {}
        fn status(&self, chain: &str) -> ConnectionStatus {
            if chain == self.0 {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            }
        }
        fn connected_chains(&self) -> Vec<ChainId> {
            vec![self.0.to_owned()]
        }
    }

    #[derive(Default)]
    struct CountingRunner {
        polls: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl TaskRunner for CountingRunner {
        async fn subscribe(&self, _: &ApiHandle, _: &SubscriptionTask) -> Result<(), TransportError> {
            Ok(())
        }
        async fn unsubscribe(&self, _: &ApiHandle, _: &SubscriptionTask) -> Result<(), TransportError> {
            Ok(())
        }
        async fn execute_once(&self, _: &ApiHandle, _: &SubscriptionTask, _: bool) -> Result<(), TransportError> {
            Ok(())
        }
        async fn poll_interval(
            &self,
            _api: &ApiHandle,
            sub: &IntervalSubscription,
            notify: bool,
        ) -> Result<(), TransportError> {
            self.polls.lock().expect("lock").push((sub.chain_id.clone(), notify));
            Ok(())
        }
    }

    fn sub(chain: &str, ticks: u32, notify: bool) -> IntervalSubscription {
        IntervalSubscription {
            action: "subscribe:interval:openGov:referendumThresholds".to_owned(),
            chain_id: chain.to_owned(),
            referendum_id: Some(1),
            category: TaskCategory::OpenGov,
            label: "Thresholds".to_owned(),
            status: TaskStatus::Enable,
            enable_os_notifications: notify,
            interval_setting: IntervalSetting::every(ticks),
            tick_counter: 0,
        }
    }

    #[tokio::test]
    async fn tick_polls_due_subscriptions_on_connected_chains() {
        let mut reg = SubscriptionRegistry::new();
        reg.hydrate(
            vec![],
            vec![sub("Polkadot", 1, true), sub("Kusama", 1, false), sub("Polkadot", 1, false)],
        );
        let registry = Mutex::new(reg);
        let runner = CountingRunner::default();

        let polled = run_tick(&registry, &OneChain("Polkadot"), &runner).await;
        // Duplicate key (Polkadot, action, 1) collapsed into one entry.
        assert_eq!(polled, 1);
        assert_eq!(
            *runner.polls.lock().expect("lock"),
            vec![("Polkadot".to_owned(), false)]
        );
    }

    #[tokio::test]
    async fn start_and_stop() {
        let registry = Arc::new(Mutex::new(SubscriptionRegistry::new()));
        let mut timer = IntervalTimer::new(Duration::from_secs(3600));
        assert!(timer.start(
            Arc::clone(&registry),
            Arc::new(OneChain("Polkadot")),
            Arc::new(CountingRunner::default()),
        ));
        assert!(timer.is_running());
        assert!(!timer.start(
            registry,
            Arc::new(OneChain("Polkadot")),
            Arc::new(CountingRunner::default()),
        ));
        assert!(timer.stop());
        assert!(!timer.stop());
        assert!(!timer.is_running());
    }
}
