//! Bootstrap lifecycle state machine.
//!
//! Pure and synchronous. The async [`Bootstrapper`](crate::Bootstrapper)
//! consults it before and after every step; re-entrancy and abort flags
//! live here so they can be tested without a runtime.

use std::fmt;

use serde::Serialize;

use chainwatch_core::types::{BootstrapFlags, BootstrapState};

use crate::error::BootstrapError;

// ─── Steps ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ConnectTransport,
    LoadAccounts,
    ConnectApis,
    HydrateAccounts,
    Subscribe,
    InitIntervals,
    StartIntervals,
    DisconnectUnused,
}

impl Step {
    pub const INITIALIZE: [Self; 7] = [
        Self::ConnectTransport,
        Self::LoadAccounts,
        Self::ConnectApis,
        Self::HydrateAccounts,
        Self::Subscribe,
        Self::InitIntervals,
        Self::DisconnectUnused,
    ];

    pub const ONLINE: [Self; 5] = [
        Self::ConnectApis,
        Self::HydrateAccounts,
        Self::Subscribe,
        Self::StartIntervals,
        Self::DisconnectUnused,
    ];

    /// Runs even after an abort has been requested.
    pub fn always_runs(self) -> bool {
        self == Self::InitIntervals
    }

    /// Needs live network connectivity.
    pub fn needs_network(self) -> bool {
        matches!(
            self,
            Self::ConnectApis
                | Self::HydrateAccounts
                | Self::Subscribe
                | Self::StartIntervals
                | Self::DisconnectUnused
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectTransport => "connect_transport",
            Self::LoadAccounts => "load_accounts",
            Self::ConnectApis => "connect_apis",
            Self::HydrateAccounts => "hydrate_accounts",
            Self::Subscribe => "subscribe",
            Self::InitIntervals => "init_intervals",
            Self::StartIntervals => "start_intervals",
            Self::DisconnectUnused => "disconnect_unused",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sequence {
    Initialize,
    SwitchOnline,
}

/// What a sequence did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceReport {
    pub sequence: Sequence,
    pub ran: Vec<Step>,
    pub skipped: Vec<Step>,
    /// Steps that ran but returned an error, with the error text.
    pub failed: Vec<(Step, String)>,
    pub aborted: bool,
}

impl SequenceReport {
    pub fn new(sequence: Sequence) -> Self {
        Self {
            sequence,
            ran: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            aborted: false,
        }
    }
}

// ─── Machine ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct BootstrapMachine {
    state: BootstrapState,
    online: bool,
    online_running: bool,
    offline_running: bool,
    abort_requested: bool,
    shutting_down: bool,
}

impl BootstrapMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn flags(&self) -> BootstrapFlags {
        self.state.flags()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// A sequence that honors abort is in progress.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state,
            BootstrapState::Initializing | BootstrapState::SwitchingOnline | BootstrapState::Aborting
        )
    }

    /// `NotStarted → Initializing`. A second call is rejected.
    pub fn begin_initialize(&mut self) -> Result<(), BootstrapError> {
        if self.shutting_down {
            return Err(BootstrapError::ShuttingDown);
        }
        if self.state != BootstrapState::NotStarted {
            return Err(BootstrapError::AlreadyInitialized);
        }
        self.state = BootstrapState::Initializing;
        Ok(())
    }

    pub fn finish_initialize(&mut self, online: bool) {
        self.state = BootstrapState::Ready;
        self.online = online;
    }

    /// Claim the online transition. A second claim while one is queued or
    /// running is rejected. An offline switch in progress does not reject the
    /// claim; the online sequence runs once it is done.
    pub fn begin_online(&mut self) -> Result<(), BootstrapError> {
        if self.shutting_down {
            return Err(BootstrapError::ShuttingDown);
        }
        if self.online_running {
            return Err(BootstrapError::AlreadyRunning);
        }
        if self.state == BootstrapState::NotStarted {
            return Err(BootstrapError::NotInitialized);
        }
        self.online_running = true;
        Ok(())
    }

    /// The claimed online transition got its turn: `→ SwitchingOnline`.
    pub fn enter_online(&mut self) {
        self.state = BootstrapState::SwitchingOnline;
    }

    /// Drop the online claim without going online.
    pub fn release_online(&mut self) {
        self.online_running = false;
    }

    pub fn finish_online(&mut self) {
        self.online_running = false;
        self.online = true;
        self.state = BootstrapState::Ready;
    }

    /// Enter `SwitchingOffline`. Returns `false` when already offline or an
    /// offline transition is in progress.
    pub fn begin_offline(&mut self) -> bool {
        if !self.online || self.offline_running || self.is_running() {
            return false;
        }
        self.offline_running = true;
        self.state = BootstrapState::SwitchingOffline;
        true
    }

    pub fn finish_offline(&mut self) {
        self.offline_running = false;
        self.online = false;
        self.state = BootstrapState::Ready;
    }

    /// Request that the running (or claimed) sequence stop at the next step
    /// boundary. Returns `false` when there is nothing to abort.
    pub fn request_abort(&mut self) -> bool {
        let running = matches!(
            self.state,
            BootstrapState::Initializing | BootstrapState::SwitchingOnline
        );
        if !running && !self.online_running {
            return false;
        }
        self.abort_requested = true;
        true
    }

    /// Latch shutdown: no transition may start from now on. Aborts whatever
    /// is running; returns whether there was something to abort.
    pub fn request_shutdown(&mut self) -> bool {
        self.shutting_down = true;
        self.request_abort()
    }

    /// Whether `step` should run given the abort flag.
    pub fn should_run(&self, step: Step) -> bool {
        !self.abort_requested || step.always_runs()
    }

    pub fn begin_abort(&mut self) {
        self.state = BootstrapState::Aborting;
    }

    /// Abort cleanup finished: offline, idle, flag cleared. The online claim
    /// is released by its owner.
    pub fn finish_abort(&mut self) {
        self.abort_requested = false;
        self.online = false;
        self.state = BootstrapState::Ready;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
