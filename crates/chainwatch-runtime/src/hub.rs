//! Hub: owns the switchboard, the subscription registry, the bootstrap
//! coordinator and both signing coordinators, and runs the single dispatch
//! loop over every window's envelopes.
//!
//! Registry mutations happen inline so windows observe them in arrival
//! order. Anything that waits on the network or a device is spawned.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use chainwatch_bootstrap::{AccountSync, Bootstrapper, ChainTransport, Collaborators, TaskRunner};
use chainwatch_core::types::{Account, SubscriptionTask, TaskStatus, WindowKind};
use chainwatch_core::{Envelope, MainMessage, ProtocolError, RendererMessage};
use chainwatch_ipc::Switchboard;
use chainwatch_signing::{
    ExtrinsicSubmitter, LedgerCoordinator, LedgerDevice, MetadataCache, PendingSignatures,
    RemoteSessionCoordinator, RemoteWallet,
};
use chainwatch_tasks::{SubscriptionRegistry, SwitchboardSink, TaskStore};

use crate::collaborators::{
    LogOnlyRunner, LogOnlySubmitter, NoMetadata, NoopAccountSync, SwitchboardEvents,
    SwitchboardFeedback, UnavailableLedger, UnavailableWallet,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One envelope received from a window, tagged with its sender.
#[derive(Debug)]
pub struct Inbound {
    pub from: WindowKind,
    pub envelope: Envelope,
}

/// External collaborators the hub is assembled from.
pub struct HubServices {
    pub store: Arc<dyn TaskStore>,
    pub transport: Arc<dyn ChainTransport>,
    pub sync: Arc<dyn AccountSync>,
    pub runner: Arc<dyn TaskRunner>,
    pub device: Arc<dyn LedgerDevice>,
    pub metadata: Arc<dyn MetadataCache>,
    pub wallet: Arc<dyn RemoteWallet>,
    pub submitter: Arc<dyn ExtrinsicSubmitter>,
}

impl HubServices {
    /// The given store and transport with the log-only stand-ins for
    /// everything else.
    pub fn reference(store: Arc<dyn TaskStore>, transport: Arc<dyn ChainTransport>) -> Self {
        Self {
            store,
            transport,
            sync: Arc::new(NoopAccountSync),
            runner: Arc::new(LogOnlyRunner),
            device: Arc::new(UnavailableLedger),
            metadata: Arc::new(NoMetadata),
            wallet: Arc::new(UnavailableWallet),
            submitter: Arc::new(LogOnlySubmitter),
        }
    }
}

pub struct Hub {
    switchboard: Arc<Mutex<Switchboard>>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    bootstrap: Arc<Bootstrapper>,
    ledger: Arc<LedgerCoordinator>,
    remote: Arc<RemoteSessionCoordinator>,
}

impl Hub {
    pub fn new(services: HubServices, tick: Duration) -> Self {
        let switchboard = Arc::new(Mutex::new(Switchboard::new()));

        let mut registry = SubscriptionRegistry::new();
        registry.add_sink(Arc::new(SwitchboardSink::new(Arc::clone(&switchboard))));
        let registry = Arc::new(Mutex::new(registry));

        let bootstrap = Arc::new(Bootstrapper::new(
            Arc::clone(&registry),
            Collaborators {
                transport: services.transport,
                store: services.store,
                sync: services.sync,
                runner: services.runner,
                events: Arc::new(SwitchboardEvents::new(Arc::clone(&switchboard))),
            },
            tick,
        ));

        let pending = Arc::new(Mutex::new(PendingSignatures::new()));
        let feedback = Arc::new(SwitchboardFeedback::new(Arc::clone(&switchboard)));
        let ledger = Arc::new(LedgerCoordinator::new(
            Arc::clone(&pending),
            services.device,
            services.metadata,
            Arc::clone(&services.submitter),
            feedback.clone(),
        ));
        let remote = Arc::new(RemoteSessionCoordinator::new(
            pending,
            services.wallet,
            services.submitter,
            feedback,
        ));

        Self {
            switchboard,
            registry,
            bootstrap,
            ledger,
            remote,
        }
    }

    pub fn switchboard(&self) -> &Arc<Mutex<Switchboard>> {
        &self.switchboard
    }

    pub fn registry(&self) -> &Arc<Mutex<SubscriptionRegistry>> {
        &self.registry
    }

    pub fn bootstrap(&self) -> &Arc<Bootstrapper> {
        &self.bootstrap
    }

    // ─── Snapshots ──────────────────────────────────────────────────

    /// Current state as seen by a freshly linked window of `kind`.
    pub fn snapshot_for(&self, kind: WindowKind) -> Vec<RendererMessage> {
        let mut messages = vec![
            RendererMessage::ConnectionStatus {
                online: self.bootstrap.is_online(),
            },
            RendererMessage::BootstrapFlags {
                flags: self.bootstrap.flags(),
            },
        ];
        messages.extend(
            self.bootstrap
                .accounts()
                .into_iter()
                .map(|account| RendererMessage::AccountAdd {
                    account,
                    snapshot: None,
                }),
        );
        {
            let registry = lock(&self.registry);
            messages.extend(
                registry
                    .all_tasks()
                    .into_iter()
                    .map(|task| RendererMessage::TaskAdd { task }),
            );
            messages.extend(
                registry
                    .intervals()
                    .iter()
                    .cloned()
                    .map(|task| RendererMessage::IntervalAdd { task }),
            );
        }
        messages.retain(|m| m.audience().contains(&kind));
        messages
    }

    /// Send the snapshot to a linked window. Returns how many messages went out.
    pub fn send_snapshot(&self, kind: WindowKind) -> usize {
        let messages = self.snapshot_for(kind);
        let sb = lock(&self.switchboard);
        for (sent, message) in messages.iter().enumerate() {
            if let Err(e) = sb.send_to(kind, message) {
                tracing::warn!("snapshot to {kind} stopped after {sent}: {e}");
                return sent;
            }
        }
        tracing::debug!("snapshot to {kind}: {} message(s)", messages.len());
        messages.len()
    }

    // ─── Dispatch ───────────────────────────────────────────────────

    /// Consume window envelopes until every sender is gone. An unrecognized
    /// task ends the loop with its error.
    pub async fn run(&self, mut inbound: mpsc::UnboundedReceiver<Inbound>) -> Result<(), ProtocolError> {
        while let Some(Inbound { from, envelope }) = inbound.recv().await {
            self.dispatch(from, &envelope)?;
        }
        tracing::info!("dispatch loop drained");
        Ok(())
    }

    pub fn dispatch(&self, from: WindowKind, envelope: &Envelope) -> Result<(), ProtocolError> {
        let message = match MainMessage::decode(envelope) {
            Ok(message) => message,
            Err(e) if e.is_fatal() => {
                tracing::error!("{from}: {e}");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("{from}: dropping envelope: {e}");
                return Ok(());
            }
        };
        tracing::debug!("{from} -> {}", envelope.task);
        self.handle(message);
        Ok(())
    }

    fn handle(&self, message: MainMessage) {
        match message {
            MainMessage::TaskSet { task } => {
                let upserted = lock(&self.registry).upsert_task(task.clone());
                match upserted {
                    Ok(()) => self.apply(vec![task]),
                    Err(e) => self.reject(&e),
                }
            }
            MainMessage::TaskToggle { task } => {
                let toggled = {
                    let mut registry = lock(&self.registry);
                    registry
                        .toggle_task(&task)
                        .and_then(|_| registry.one_shot(&task))
                };
                match toggled {
                    Ok(request) => self.apply(vec![request.task]),
                    Err(e) => self.reject(&e),
                }
            }
            MainMessage::TaskNotifications { task, enabled } => {
                let updated = lock(&self.registry).set_os_notifications(&task, enabled);
                if let Err(e) = updated {
                    self.reject(&e);
                }
            }
            MainMessage::TaskExecute { task } => {
                let bootstrap = Arc::clone(&self.bootstrap);
                let switchboard = Arc::clone(&self.switchboard);
                tokio::spawn(async move {
                    if let Err(e) = bootstrap.execute_one_shot(&task).await {
                        toast(&switchboard, format!("{}: {e}", task.action));
                    }
                });
            }
            MainMessage::CategoryToggle { category, scope } => {
                let changed = lock(&self.registry).toggle_category(category, &scope);
                self.apply(changed);
            }
            MainMessage::IntervalAdd { tasks } => {
                let online = self.bootstrap.is_online();
                let insert = lock(&self.registry).insert_interval_subscriptions(tasks, online);
                tracing::info!(
                    "{} interval(s) added, {} updated",
                    insert.added.len(),
                    insert.updated.len()
                );
                // Also connects chains only the new subscriptions need.
                if online && insert.enables_any() {
                    self.start_intervals();
                }
            }
            MainMessage::IntervalRemove { keys } => {
                let removal = lock(&self.registry).remove_interval_subscriptions(&keys);
                if removal.stop_timer {
                    self.bootstrap.stop_timer();
                }
                if !removal.removed.is_empty() && self.bootstrap.is_online() {
                    let bootstrap = Arc::clone(&self.bootstrap);
                    tokio::spawn(async move { bootstrap.disconnect_unused().await });
                }
            }
            MainMessage::IntervalToggle { key } => {
                let toggled = lock(&self.registry).toggle_interval(&key);
                match toggled {
                    Ok(TaskStatus::Enable) if self.bootstrap.is_online() => self.start_intervals(),
                    Ok(_) => {
                        if !lock(&self.registry).has_enabled_intervals() {
                            self.bootstrap.stop_timer();
                        }
                    }
                    Err(e) => self.reject(&e),
                }
            }
            MainMessage::AccountImport { account } => {
                self.broadcast(RendererMessage::AccountAdd {
                    account: account.clone(),
                    snapshot: None,
                });
                self.add_account(account);
            }
            MainMessage::AccountRemove { address, chain_id } => {
                self.broadcast(RendererMessage::AccountRemove {
                    address: address.clone(),
                    chain_id: chain_id.clone(),
                });
                let bootstrap = Arc::clone(&self.bootstrap);
                tokio::spawn(async move {
                    if let Err(e) = bootstrap.remove_account(&address, &chain_id).await {
                        tracing::warn!("remove account {address}: {e}");
                    }
                });
            }
            MainMessage::BackupImport { contents } => {
                let online = self.bootstrap.is_online();
                let imported = lock(&self.registry).import_backup(&contents, online);
                match imported {
                    Ok(report) => {
                        for error in &report.errors {
                            tracing::warn!("backup: {error}");
                        }
                        self.toast(report.summary());
                        for account in report.accounts {
                            self.broadcast(RendererMessage::AccountAdd {
                                account: account.clone(),
                                snapshot: None,
                            });
                            self.add_account(account);
                        }
                        if online && report.intervals_imported > 0 {
                            self.start_intervals();
                        }
                    }
                    Err(e) => self.reject(&e),
                }
            }
            MainMessage::ConnectionSet { online } => self.set_connection(online),
            MainMessage::EndpointChange { chain_id, endpoint } => {
                let bootstrap = Arc::clone(&self.bootstrap);
                tokio::spawn(async move {
                    bootstrap.change_endpoint(&chain_id, &endpoint).await;
                });
            }
            MainMessage::LedgerSign {
                request,
                account_index,
            } => {
                let ledger = Arc::clone(&self.ledger);
                tokio::spawn(async move {
                    let tx_id = request.tx_id.clone();
                    match ledger.sign(request, account_index).await {
                        Ok(outcome) => tracing::debug!("{tx_id}: ledger flow ended {outcome:?}"),
                        Err(e) => tracing::warn!("{tx_id}: {e}"),
                    }
                });
            }
            MainMessage::WcSign { request } => {
                let remote = Arc::clone(&self.remote);
                tokio::spawn(async move {
                    let tx_id = request.tx_id.clone();
                    match remote.sign(request).await {
                        Ok(outcome) => tracing::debug!("{tx_id}: wallet flow ended {outcome:?}"),
                        Err(e) => tracing::warn!("{tx_id}: {e}"),
                    }
                });
            }
            MainMessage::WcCancel { tx_id } => {
                let ledger_phase = self.ledger.phase();
                let canceled = if ledger_phase.is_busy() && ledger_phase.tx_id() == Some(tx_id.as_str()) {
                    self.ledger.cancel(&tx_id)
                } else {
                    self.remote.cancel(&tx_id)
                };
                if !canceled {
                    tracing::debug!("{tx_id}: nothing pending to cancel");
                }
            }
            MainMessage::WcSessionDeleted { topic } => {
                if !self.remote.on_session_deleted(&topic) {
                    tracing::debug!("session {topic} was not cached");
                }
            }
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────

    /// Bring live subscriptions in line with the tasks' new status.
    fn apply(&self, tasks: Vec<SubscriptionTask>) {
        if tasks.is_empty() || !self.bootstrap.is_online() {
            return;
        }
        let bootstrap = Arc::clone(&self.bootstrap);
        tokio::spawn(async move {
            for task in &tasks {
                bootstrap.apply_task(task).await;
            }
        });
    }

    fn start_intervals(&self) {
        let bootstrap = Arc::clone(&self.bootstrap);
        tokio::spawn(async move { bootstrap.start_intervals().await });
    }

    fn add_account(&self, account: Account) {
        let bootstrap = Arc::clone(&self.bootstrap);
        let switchboard = Arc::clone(&self.switchboard);
        let address = account.address.clone();
        broadcast(
            &switchboard,
            RendererMessage::AccountProcessing {
                address: address.clone(),
                processing: true,
            },
        );
        tokio::spawn(async move {
            if let Err(e) = bootstrap.add_account(account).await {
                toast(&switchboard, format!("account {address}: {e}"));
            }
            broadcast(
                &switchboard,
                RendererMessage::AccountProcessing {
                    address,
                    processing: false,
                },
            );
        });
    }

    /// The request is recorded here, in arrival order; the spawned driver
    /// applies whichever request is latest when its turn comes.
    fn set_connection(&self, online: bool) {
        if self.bootstrap.request_connectivity(online) {
            tracing::info!("abort requested for running transition");
        }
        let bootstrap = Arc::clone(&self.bootstrap);
        tokio::spawn(async move { bootstrap.reconcile().await });
    }

    fn broadcast(&self, message: RendererMessage) {
        broadcast(&self.switchboard, message);
    }

    fn toast(&self, message: String) {
        toast(&self.switchboard, message);
    }

    fn reject(&self, error: &dyn std::error::Error) {
        tracing::warn!("rejected: {error}");
        self.toast(error.to_string());
    }

    /// Stop transitions and timers, detach the registry sinks so the
    /// persister can drain.
    pub async fn shutdown(&self) {
        self.bootstrap.shutdown().await;
        lock(&self.registry).clear_sinks();
    }
}

fn broadcast(switchboard: &Mutex<Switchboard>, message: RendererMessage) {
    if let Err(e) = lock(switchboard).broadcast(&message) {
        tracing::warn!("broadcast failed: {e}");
    }
}

fn toast(switchboard: &Mutex<Switchboard>, message: String) {
    tracing::info!("toast: {message}");
    broadcast(switchboard, RendererMessage::Toast { message });
}

// ─── Tests ───────────────────────────────────────────────────────────
