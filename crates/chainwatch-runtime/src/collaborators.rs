//! Reference collaborators wired into the hub binary.
//!
//! Decoding chain data and talking to signing hardware happen in external
//! components. The stand-ins here log what they would do, or report the
//! device as unavailable, so the hub runs end to end without them.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use chainwatch_bootstrap::{AccountSync, AccountSyncResult, ApiHandle, HubEvents, TaskRunner, TransportError};
use chainwatch_core::RendererMessage;
use chainwatch_core::types::{
    Account, AccountSnapshot, BootstrapFlags, IntervalSubscription, SigningRequest, SubscriptionTask,
};
use chainwatch_ipc::Switchboard;
use chainwatch_signing::{
    BuilderFeedback, DeviceError, DeviceErrorCode, ExtrinsicSubmitter, LedgerDevice, MetadataCache,
    RemoteError, RemoteSession, RemoteWallet,
};

// ─── Switchboard Adapters ───────────────────────────────────────────

fn broadcast(switchboard: &Mutex<Switchboard>, message: RendererMessage) {
    let sb = switchboard.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = sb.broadcast(&message) {
        tracing::warn!("broadcast failed: {e}");
    }
}

/// Bootstrap lifecycle events as renderer broadcasts.
pub struct SwitchboardEvents {
    switchboard: Arc<Mutex<Switchboard>>,
}

impl SwitchboardEvents {
    pub fn new(switchboard: Arc<Mutex<Switchboard>>) -> Self {
        Self { switchboard }
    }
}

impl HubEvents for SwitchboardEvents {
    fn flags_changed(&self, flags: BootstrapFlags) {
        broadcast(&self.switchboard, RendererMessage::BootstrapFlags { flags });
    }

    fn online_changed(&self, online: bool) {
        broadcast(&self.switchboard, RendererMessage::ConnectionStatus { online });
    }

    fn account_synced(&self, account: &Account, snapshot: &AccountSnapshot) {
        broadcast(
            &self.switchboard,
            RendererMessage::AccountAdd {
                account: account.clone(),
                snapshot: Some(snapshot.clone()),
            },
        );
    }
}

/// Signing progress for the extrinsic builder and tab windows.
pub struct SwitchboardFeedback {
    switchboard: Arc<Mutex<Switchboard>>,
}

impl SwitchboardFeedback {
    pub fn new(switchboard: Arc<Mutex<Switchboard>>) -> Self {
        Self { switchboard }
    }
}

impl BuilderFeedback for SwitchboardFeedback {
    fn building(&self, tx_id: &str, building: bool) {
        broadcast(
            &self.switchboard,
            RendererMessage::TxBuilding {
                tx_id: tx_id.to_owned(),
                building,
            },
        );
    }

    fn device_error(&self, tx_id: &str, code: DeviceErrorCode, message: &str) {
        broadcast(
            &self.switchboard,
            RendererMessage::LedgerError {
                tx_id: tx_id.to_owned(),
                code: code.as_str().to_owned(),
                message: message.to_owned(),
            },
        );
    }

    fn modal(&self, tx_id: &str, open: bool) {
        let tx_id = tx_id.to_owned();
        let message = if open {
            RendererMessage::WcModalOpen { tx_id }
        } else {
            RendererMessage::WcModalClose { tx_id }
        };
        broadcast(&self.switchboard, message);
    }

    fn overlay_close(&self) {
        broadcast(&self.switchboard, RendererMessage::OverlayClose);
    }

    fn submitted(&self, tx_id: &str) {
        broadcast(
            &self.switchboard,
            RendererMessage::TxSubmitted {
                tx_id: tx_id.to_owned(),
            },
        );
    }

    fn failed(&self, tx_id: &str, message: &str) {
        broadcast(
            &self.switchboard,
            RendererMessage::Toast {
                message: format!("transaction {tx_id} failed: {message}"),
            },
        );
    }
}

// ─── Chain Data ─────────────────────────────────────────────────────

/// Records subscriptions and polls in the log.
pub struct LogOnlyRunner;

#[async_trait]
impl TaskRunner for LogOnlyRunner {
    async fn subscribe(&self, api: &ApiHandle, task: &SubscriptionTask) -> Result<(), TransportError> {
        tracing::info!("subscribe {} on {}", task.task_ref(), api.endpoint);
        Ok(())
    }

    async fn unsubscribe(&self, api: &ApiHandle, task: &SubscriptionTask) -> Result<(), TransportError> {
        tracing::info!("unsubscribe {} on {}", task.task_ref(), api.endpoint);
        Ok(())
    }

    async fn execute_once(
        &self,
        api: &ApiHandle,
        task: &SubscriptionTask,
        notify: bool,
    ) -> Result<(), TransportError> {
        tracing::info!("execute {} on {} (notify={notify})", task.task_ref(), api.endpoint);
        Ok(())
    }

    async fn poll_interval(
        &self,
        api: &ApiHandle,
        sub: &IntervalSubscription,
        notify: bool,
    ) -> Result<(), TransportError> {
        tracing::info!("poll {} on {} (notify={notify})", sub.key(), api.endpoint);
        Ok(())
    }
}

/// Reports every account as synced with no decoded data.
pub struct NoopAccountSync;

#[async_trait]
impl AccountSync for NoopAccountSync {
    async fn sync_all_accounts(&self, api: &ApiHandle, accounts: &[Account]) -> Vec<AccountSyncResult> {
        let now = chrono::Utc::now();
        accounts
            .iter()
            .map(|account| AccountSyncResult {
                account: account.clone(),
                outcome: Ok(AccountSnapshot {
                    address: account.address.clone(),
                    chain_id: api.chain_id.clone(),
                    data: serde_json::Value::Null,
                    synced_at: now,
                }),
            })
            .collect()
    }
}

// ─── Signing ────────────────────────────────────────────────────────

/// No hardware wallet attached.
pub struct UnavailableLedger;

#[async_trait]
impl LedgerDevice for UnavailableLedger {
    async fn sign(&self, _index: u32, _payload: &[u8], _metadata: &[u8]) -> Result<Vec<u8>, DeviceError> {
        Err(DeviceError::new(
            DeviceErrorCode::Disconnected,
            "no ledger device attached",
        ))
    }
}

/// Metadata is only available when attached to the request.
pub struct NoMetadata;

#[async_trait]
impl MetadataCache for NoMetadata {
    async fn fetch(&self, _chain_id: &str) -> Option<Vec<u8>> {
        None
    }
}

/// No wallet relay configured.
pub struct UnavailableWallet;

#[async_trait]
impl RemoteWallet for UnavailableWallet {
    async fn establish(&self, chain_id: &str) -> Result<RemoteSession, RemoteError> {
        Err(RemoteError::Relay(format!("no wallet relay configured for {chain_id}")))
    }

    async fn request_signature(
        &self,
        _session: &RemoteSession,
        _request: &SigningRequest,
    ) -> Result<Vec<u8>, RemoteError> {
        Err(RemoteError::Relay("no wallet relay configured".to_owned()))
    }
}

/// Logs signed extrinsics instead of broadcasting them.
pub struct LogOnlySubmitter;

#[async_trait]
impl ExtrinsicSubmitter for LogOnlySubmitter {
    async fn submit(&self, request: &SigningRequest, signature: &[u8]) -> Result<(), String> {
        tracing::info!(
            "tx {} on {} signed ({} byte signature)",
            request.tx_id,
            request.chain_id,
            signature.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_core::types::{AccountSource, SigningOutcome, WindowKind};
    use chainwatch_ipc::OpenArgs;

    fn linked(kind: WindowKind) -> (Arc<Mutex<Switchboard>>, chainwatch_ipc::WindowLink) {
        let sb = Arc::new(Mutex::new(Switchboard::new()));
        let link = {
            let mut guard = sb.lock().expect("lock");
            let (handle, _) = guard.open_window(kind, OpenArgs::default()).expect("open");
            guard.link(&handle).expect("link")
        };
        (sb, link)
    }

    fn request() -> SigningRequest {
        SigningRequest {
            tx_id: "t1".to_owned(),
            chain_id: "Polkadot".to_owned(),
            from: "15alice".to_owned(),
            payload: vec![1],
            metadata: None,
            outcome: SigningOutcome::Pending,
        }
    }

    #[test]
    fn device_errors_reach_the_builder_as_ledger_errors() {
        let (sb, mut link) = linked(WindowKind::Action);
        let feedback = SwitchboardFeedback::new(sb);

        feedback.device_error("t1", DeviceErrorCode::AppNotOpen, "open the app");
        feedback.building("t1", false);

        let first = RendererMessage::decode(&link.to_window.try_recv().expect("error")).expect("decode");
        assert_eq!(
            first,
            RendererMessage::LedgerError {
                tx_id: "t1".to_owned(),
                code: DeviceErrorCode::AppNotOpen.as_str().to_owned(),
                message: "open the app".to_owned(),
            }
        );
        let second = RendererMessage::decode(&link.to_window.try_recv().expect("building")).expect("decode");
        assert_eq!(
            second,
            RendererMessage::TxBuilding {
                tx_id: "t1".to_owned(),
                building: false
            }
        );
    }

    #[test]
    fn synced_accounts_carry_their_snapshot() {
        let (sb, mut link) = linked(WindowKind::Import);
        let events = SwitchboardEvents::new(sb);
        let account = Account {
            address: "15alice".to_owned(),
            chain_id: "Polkadot".to_owned(),
            name: "Alice".to_owned(),
            source: AccountSource::ReadOnly,
        };
        let snapshot = AccountSnapshot {
            address: "15alice".to_owned(),
            chain_id: "Polkadot".to_owned(),
            data: serde_json::json!({"free": "10"}),
            synced_at: chrono::Utc::now(),
        };

        events.online_changed(true);
        events.account_synced(&account, &snapshot);

        let messages: Vec<RendererMessage> = std::iter::from_fn(|| link.to_window.try_recv().ok())
            .map(|env| RendererMessage::decode(&env).expect("decode"))
            .collect();
        assert!(messages.contains(&RendererMessage::ConnectionStatus { online: true }));
        assert!(messages.contains(&RendererMessage::AccountAdd {
            account,
            snapshot: Some(snapshot)
        }));
    }

    #[tokio::test]
    async fn stand_in_devices_report_unavailable() {
        let err = UnavailableLedger.sign(0, &[1], &[2]).await.expect_err("no device");
        assert_eq!(err.code, DeviceErrorCode::Disconnected);
        assert!(NoMetadata.fetch("Polkadot").await.is_none());
        assert!(matches!(
            UnavailableWallet.establish("Polkadot").await,
            Err(RemoteError::Relay(_))
        ));
        assert!(LogOnlySubmitter.submit(&request(), &[0; 64]).await.is_ok());
    }
}
