//! Async bootstrapping coordinator.
//!
//! Runs the initialization and online sequences as an arena of discrete
//! steps, checking the abort flag between every two. All transition flags
//! are cleared on every exit path.
//!
//! Sequences take turns: `initialize`, the online and offline switches and
//! `shutdown` each hold the transition lock while they run, so they apply
//! in the order they were asked for.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as TurnLock;

use chainwatch_core::types::{
    Account, BootstrapFlags, BootstrapState, ChainId, ConnectionStatus, SubscriptionTask, TaskRef,
};
use chainwatch_tasks::{SubscriptionRegistry, TaskStore};

use crate::collaborators::{AccountSync, ChainTransport, HubEvents, TaskRunner};
use crate::error::BootstrapError;
use crate::machine::{BootstrapMachine, Sequence, SequenceReport, Step};
use crate::timer::IntervalTimer;

/// Collaborators handed to the coordinator at construction.
pub struct Collaborators {
    pub transport: Arc<dyn ChainTransport>,
    pub store: Arc<dyn TaskStore>,
    pub sync: Arc<dyn AccountSync>,
    pub runner: Arc<dyn TaskRunner>,
    pub events: Arc<dyn HubEvents>,
}

pub struct Bootstrapper {
    machine: Mutex<BootstrapMachine>,
    turn: TurnLock<()>,
    /// Latest connectivity asked for through `request_connectivity`.
    desired: Mutex<Option<bool>>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    accounts: Mutex<Vec<Account>>,
    timer: Mutex<IntervalTimer>,
    transport: Arc<dyn ChainTransport>,
    store: Arc<dyn TaskStore>,
    sync: Arc<dyn AccountSync>,
    runner: Arc<dyn TaskRunner>,
    events: Arc<dyn HubEvents>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Bootstrapper {
    pub fn new(
        registry: Arc<Mutex<SubscriptionRegistry>>,
        collaborators: Collaborators,
        tick: Duration,
    ) -> Self {
        Self {
            machine: Mutex::new(BootstrapMachine::new()),
            turn: TurnLock::new(()),
            desired: Mutex::new(None),
            registry,
            accounts: Mutex::new(Vec::new()),
            timer: Mutex::new(IntervalTimer::new(tick)),
            transport: collaborators.transport,
            store: collaborators.store,
            sync: collaborators.sync,
            runner: collaborators.runner,
            events: collaborators.events,
        }
    }

    // ─── Queries ────────────────────────────────────────────────────

    pub fn state(&self) -> BootstrapState {
        lock(&self.machine).state()
    }

    pub fn flags(&self) -> BootstrapFlags {
        lock(&self.machine).flags()
    }

    pub fn is_online(&self) -> bool {
        lock(&self.machine).is_online()
    }

    pub fn accounts(&self) -> Vec<Account> {
        lock(&self.accounts).clone()
    }

    pub fn registry(&self) -> &Arc<Mutex<SubscriptionRegistry>> {
        &self.registry
    }

    pub fn timer_running(&self) -> bool {
        lock(&self.timer).is_running()
    }

    // ─── Sequences ──────────────────────────────────────────────────

    /// Run the startup sequence. Network steps are skipped when `online` is
    /// false. Only valid once.
    pub async fn initialize(&self, online: bool) -> Result<SequenceReport, BootstrapError> {
        lock(&self.machine).begin_initialize()?;
        let _turn = self.turn.lock().await;
        self.emit_flags();
        tracing::info!("initializing ({})", if online { "online" } else { "offline" });

        let mut report = SequenceReport::new(Sequence::Initialize);
        for step in Step::INITIALIZE {
            if !online && step.needs_network() {
                report.skipped.push(step);
                continue;
            }
            self.run_checked(step, online, &mut report).await;
        }
        // An abort that arrived during the last step still counts.
        report.aborted |= lock(&self.machine).abort_requested();

        if report.aborted {
            self.abort_cleanup().await;
        } else {
            lock(&self.machine).finish_initialize(online);
            self.events.online_changed(online);
        }
        self.finish_sequence(&report);
        Ok(report)
    }

    /// Reconnect everything. A concurrent call returns `AlreadyRunning`; a
    /// call during an offline switch runs after it.
    pub async fn switch_online(&self) -> Result<SequenceReport, BootstrapError> {
        lock(&self.machine).begin_online()?;
        let _turn = self.turn.lock().await;
        Ok(self.run_online().await)
    }

    /// Body of the online switch. The caller holds the turn and the claim.
    async fn run_online(&self) -> SequenceReport {
        lock(&self.machine).enter_online();
        self.emit_flags();
        tracing::info!("switching online");

        let mut report = SequenceReport::new(Sequence::SwitchOnline);
        for step in Step::ONLINE {
            self.run_checked(step, true, &mut report).await;
        }
        report.aborted |= lock(&self.machine).abort_requested();

        if report.aborted {
            self.abort_cleanup().await;
            lock(&self.machine).release_online();
        } else {
            lock(&self.machine).finish_online();
            self.events.online_changed(true);
        }
        self.finish_sequence(&report);
        report
    }

    /// Stop the timer, announce offline, close every API. Returns `false`
    /// when already offline. Waits for a running sequence to finish first.
    pub async fn switch_offline(&self) -> bool {
        let _turn = self.turn.lock().await;
        self.run_offline().await
    }

    async fn run_offline(&self) -> bool {
        if !lock(&self.machine).begin_offline() {
            tracing::debug!("switch_offline ignored: already offline");
            return false;
        }
        self.emit_flags();
        self.offline_routine().await;
        lock(&self.machine).finish_offline();
        self.emit_flags();
        tracing::info!("offline");
        true
    }

    /// Ask the running sequence to stop at the next step boundary.
    pub fn request_abort(&self) -> bool {
        let requested = lock(&self.machine).request_abort();
        if requested {
            tracing::info!("abort requested");
        }
        requested
    }

    /// Record the connectivity the user asked for. Going offline also aborts
    /// a running or queued online sequence. Returns whether an abort was
    /// requested.
    pub fn request_connectivity(&self, online: bool) -> bool {
        *lock(&self.desired) = Some(online);
        !online && self.request_abort()
    }

    /// Drive toward the latest requested connectivity. Each call waits its
    /// turn and reads the request only then, so the last request wins
    /// whatever order the calls run in.
    pub async fn reconcile(&self) {
        let _turn = self.turn.lock().await;
        let Some(want) = *lock(&self.desired) else {
            return;
        };
        if want == self.is_online() {
            return;
        }
        if !want {
            self.run_offline().await;
            return;
        }
        let claimed = lock(&self.machine).begin_online();
        if let Err(e) = claimed {
            tracing::info!("online request dropped: {e}");
            return;
        }
        let report = self.run_online().await;
        if report.aborted {
            tracing::info!("online request aborted");
        }
    }

    /// Latch shutdown, abort any running sequence, wait for it to settle,
    /// then close all connections. No transition starts afterwards.
    pub async fn shutdown(&self) {
        if lock(&self.machine).request_shutdown() {
            tracing::info!("abort requested for shutdown");
        }
        let _turn = self.turn.lock().await;
        if !self.run_offline().await {
            lock(&self.timer).stop();
            self.transport.close_all().await;
        }
        tracing::info!("bootstrap shut down");
    }

    async fn run_checked(&self, step: Step, online: bool, report: &mut SequenceReport) {
        if !lock(&self.machine).should_run(step) {
            report.aborted = true;
            report.skipped.push(step);
            return;
        }
        tracing::debug!("step {step}");
        match self.run_step(step, online).await {
            Ok(()) => report.ran.push(step),
            Err(e) => {
                tracing::warn!("step {step} failed: {e}");
                report.ran.push(step);
                report.failed.push((step, e.to_string()));
            }
        }
    }

    async fn run_step(&self, step: Step, online: bool) -> Result<(), BootstrapError> {
        match step {
            Step::ConnectTransport => self.transport.initialize().await?,
            Step::LoadAccounts => self.load_accounts().await?,
            Step::ConnectApis => self.connect_apis().await,
            Step::HydrateAccounts => self.hydrate_accounts().await,
            Step::Subscribe => self.subscribe_all().await,
            Step::InitIntervals => {
                let count = lock(&self.registry).intervals().len();
                tracing::debug!("{count} interval subscription(s) registered");
                let aborting = lock(&self.machine).abort_requested();
                if online && !aborting {
                    self.start_intervals().await;
                }
            }
            Step::StartIntervals => self.start_intervals().await,
            Step::DisconnectUnused => self.disconnect_unused().await,
        }
        Ok(())
    }

    async fn abort_cleanup(&self) {
        lock(&self.machine).begin_abort();
        self.emit_flags();
        tracing::info!("aborting: running offline cleanup");
        self.offline_routine().await;
        lock(&self.machine).finish_abort();
    }

    async fn offline_routine(&self) {
        lock(&self.timer).stop();
        self.events.online_changed(false);
        self.transport.close_all().await;
    }

    fn finish_sequence(&self, report: &SequenceReport) {
        self.emit_flags();
        tracing::info!(
            "{:?} finished: {} ran, {} skipped, {} failed{}",
            report.sequence,
            report.ran.len(),
            report.skipped.len(),
            report.failed.len(),
            if report.aborted { " (aborted)" } else { "" }
        );
    }

    fn emit_flags(&self) {
        let flags = self.flags();
        self.events.flags_changed(flags);
    }

    // ─── Step Bodies ────────────────────────────────────────────────

    async fn load_accounts(&self) -> Result<(), BootstrapError> {
        let accounts = self.store.load_accounts().await?;
        let tasks = self.store.load_tasks().await?;
        let intervals = self.store.load_intervals().await?;
        tracing::info!(
            "loaded {} account(s), {} task(s), {} interval(s)",
            accounts.len(),
            tasks.len(),
            intervals.len()
        );
        *lock(&self.accounts) = accounts;
        lock(&self.registry).hydrate(tasks, intervals);
        Ok(())
    }

    fn account_chains(&self) -> BTreeSet<ChainId> {
        lock(&self.accounts)
            .iter()
            .map(|a| a.chain_id.clone())
            .collect()
    }

    /// Chains that must stay connected: any account or interval on them.
    fn needed_chains(&self) -> BTreeSet<ChainId> {
        let mut chains = self.account_chains();
        chains.extend(lock(&self.registry).interval_chains());
        chains
    }

    async fn connect_apis(&self) {
        for chain in self.account_chains() {
            if let Err(e) = self.transport.connect(&chain).await {
                tracing::warn!("connect {chain} failed: {e}");
            }
        }
    }

    async fn hydrate_accounts(&self) {
        for chain in self.account_chains() {
            self.hydrate_chain(&chain).await;
        }
    }

    async fn hydrate_chain(&self, chain: &str) {
        let accounts: Vec<Account> = lock(&self.accounts)
            .iter()
            .filter(|a| a.chain_id == chain)
            .cloned()
            .collect();
        if accounts.is_empty() {
            return;
        }
        let api = match self.transport.api(chain).await {
            Ok(api) => api,
            Err(e) => {
                tracing::warn!("hydrate {chain} skipped: {e}");
                return;
            }
        };
        for result in self.sync.sync_all_accounts(&api, &accounts).await {
            match result.outcome {
                Ok(snapshot) => self.events.account_synced(&result.account, &snapshot),
                Err(e) => tracing::warn!("sync {} failed: {e}", result.account.address),
            }
        }
    }

    async fn subscribe_all(&self) {
        for chain in self.transport.connected_chains() {
            self.subscribe_chain(&chain).await;
        }
    }

    async fn subscribe_chain(&self, chain: &str) -> usize {
        let tasks = lock(&self.registry).enabled_tasks_for_chain(chain);
        if tasks.is_empty() {
            return 0;
        }
        let api = match self.transport.api(chain).await {
            Ok(api) => api,
            Err(e) => {
                tracing::warn!("subscribe {chain} skipped: {e}");
                return 0;
            }
        };
        let mut subscribed = 0usize;
        for task in &tasks {
            match self.runner.subscribe(&api, task).await {
                Ok(()) => subscribed += 1,
                Err(e) => tracing::warn!("subscribe {} failed: {e}", task.task_ref()),
            }
        }
        tracing::debug!("{chain}: {subscribed} task(s) subscribed");
        subscribed
    }

    /// Connect the chains interval subscriptions need and start the timer.
    /// A no-op while no interval is enabled.
    pub async fn start_intervals(&self) {
        let chains = {
            let registry = lock(&self.registry);
            if !registry.has_enabled_intervals() {
                return;
            }
            registry.interval_chains()
        };
        let connected: BTreeSet<ChainId> = self.transport.connected_chains().into_iter().collect();
        for chain in chains.difference(&connected) {
            if let Err(e) = self.transport.connect(chain).await {
                tracing::warn!("connect {chain} for intervals failed: {e}");
            }
        }
        self.start_timer();
    }

    /// Close every chain no account or interval subscription needs.
    pub async fn disconnect_unused(&self) {
        let needed = self.needed_chains();
        for chain in self.transport.connected_chains() {
            if !needed.contains(&chain) {
                tracing::info!("closing unused {chain}");
                self.transport.close(&chain).await;
            }
        }
    }

    // ─── Runtime Operations ─────────────────────────────────────────

    /// Start the interval timer if it is not already running.
    pub fn start_timer(&self) -> bool {
        lock(&self.timer).start(
            Arc::clone(&self.registry),
            Arc::clone(&self.transport),
            Arc::clone(&self.runner),
        )
    }

    pub fn stop_timer(&self) -> bool {
        lock(&self.timer).stop()
    }

    /// Apply a new RPC endpoint. Returns `true` when the chain's tasks were
    /// re-subscribed; `false` leaves the chain dormant.
    pub async fn change_endpoint(&self, chain: &str, endpoint: &str) -> bool {
        if !self.is_online() {
            self.transport.set_endpoint(chain, endpoint);
            tracing::info!("{chain} endpoint set to {endpoint} (offline)");
            return false;
        }
        if let Err(e) = self.transport.connect_endpoint(chain, endpoint).await {
            tracing::warn!("{chain} endpoint change failed: {e}");
            return false;
        }
        if self.transport.status(chain) != ConnectionStatus::Connected {
            tracing::info!("{chain} endpoint changed; chain dormant");
            return false;
        }
        self.subscribe_chain(chain).await;
        true
    }

    /// Fetch a task once against the live API, with its notification flag.
    pub async fn execute_one_shot(&self, task_ref: &TaskRef) -> Result<(), BootstrapError> {
        let request = lock(&self.registry).one_shot(task_ref)?;
        if !self.is_online() {
            return Err(BootstrapError::Offline);
        }
        let chain = request.task.chain_id.clone();
        if self.transport.status(&chain) != ConnectionStatus::Connected {
            self.transport.connect(&chain).await?;
        }
        let api = self.transport.api(&chain).await?;
        self.runner
            .execute_once(&api, &request.task, request.notify)
            .await?;
        Ok(())
    }

    /// Bring a task's live subscription in line with its status.
    pub async fn apply_task(&self, task: &SubscriptionTask) {
        if !self.is_online() || self.transport.status(&task.chain_id) != ConnectionStatus::Connected {
            return;
        }
        let api = match self.transport.api(&task.chain_id).await {
            Ok(api) => api,
            Err(e) => {
                tracing::warn!("apply {} skipped: {e}", task.task_ref());
                return;
            }
        };
        let result = if task.is_enabled() {
            self.runner.subscribe(&api, task).await
        } else {
            self.runner.unsubscribe(&api, task).await
        };
        if let Err(e) = result {
            tracing::warn!("apply {} failed: {e}", task.task_ref());
        }
    }

    /// Persist a new account and, when online, connect and hydrate it.
    pub async fn add_account(&self, account: Account) -> Result<(), BootstrapError> {
        self.store.save_account(&account).await?;
        let chain = account.chain_id.clone();
        {
            let mut accounts = lock(&self.accounts);
            accounts.retain(|a| !(a.address == account.address && a.chain_id == account.chain_id));
            accounts.push(account);
        }
        if self.is_online() {
            if let Err(e) = self.transport.connect(&chain).await {
                tracing::warn!("connect {chain} failed: {e}");
                return Ok(());
            }
            self.hydrate_chain(&chain).await;
            self.subscribe_chain(&chain).await;
        }
        Ok(())
    }

    /// Forget an account and its tasks, stop their live subscriptions, and
    /// close its chain when nothing else needs it.
    pub async fn remove_account(&self, address: &str, chain_id: &str) -> Result<(), BootstrapError> {
        self.store.delete_account(address, chain_id).await?;
        lock(&self.accounts).retain(|a| !(a.address == address && a.chain_id == chain_id));
        let removed = lock(&self.registry).remove_tasks_for_account(address, chain_id);
        tracing::info!("account {address} removed with {} task(s)", removed.len());
        if self.is_online() {
            self.unsubscribe_all(chain_id, &removed).await;
            self.disconnect_unused().await;
        }
        Ok(())
    }

    async fn unsubscribe_all(&self, chain: &str, tasks: &[SubscriptionTask]) {
        let live: Vec<&SubscriptionTask> = tasks.iter().filter(|t| t.is_enabled()).collect();
        if live.is_empty() || self.transport.status(chain) != ConnectionStatus::Connected {
            return;
        }
        let api = match self.transport.api(chain).await {
            Ok(api) => api,
            Err(e) => {
                tracing::warn!("unsubscribe on {chain} skipped: {e}");
                return;
            }
        };
        for task in live {
            if let Err(e) = self.runner.unsubscribe(&api, task).await {
                tracing::warn!("unsubscribe {} failed: {e}", task.task_ref());
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
