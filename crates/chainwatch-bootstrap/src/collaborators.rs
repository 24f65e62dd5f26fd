//! External collaborators the coordinator drives.
//!
//! Every network, decoding and notification concern sits behind one of these
//! traits so the coordinator can be exercised with in-memory mocks.

use async_trait::async_trait;

use chainwatch_core::types::{
    Account, AccountSnapshot, BootstrapFlags, ChainId, ConnectionStatus, IntervalSubscription,
    SubscriptionTask,
};

use crate::error::TransportError;

/// A connected chain API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiHandle {
    pub chain_id: ChainId,
    pub endpoint: String,
}

/// Owns the RPC/light-client connections.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// One-time setup before any chain connects.
    async fn initialize(&self) -> Result<(), TransportError>;

    async fn connect(&self, chain: &str) -> Result<(), TransportError>;

    /// Switch the chain to `endpoint` and connect through it.
    async fn connect_endpoint(&self, chain: &str, endpoint: &str) -> Result<(), TransportError>;

    /// Record `endpoint` for the next connect without connecting.
    fn set_endpoint(&self, chain: &str, endpoint: &str);

    /// The connected API for `chain`, or `NotConnected`.
    async fn api(&self, chain: &str) -> Result<ApiHandle, TransportError>;

    async fn close(&self, chain: &str);

    async fn close_all(&self);

    fn status(&self, chain: &str) -> ConnectionStatus;

    fn connected_chains(&self) -> Vec<ChainId>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountSyncResult {
    pub account: Account,
    pub outcome: Result<AccountSnapshot, TransportError>,
}

/// Fetches balance/staking/governance data for accounts.
#[async_trait]
pub trait AccountSync: Send + Sync {
    async fn sync_all_accounts(&self, api: &ApiHandle, accounts: &[Account]) -> Vec<AccountSyncResult>;
}

/// Executes subscription and interval tasks against a live API.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn subscribe(&self, api: &ApiHandle, task: &SubscriptionTask) -> Result<(), TransportError>;

    async fn unsubscribe(&self, api: &ApiHandle, task: &SubscriptionTask) -> Result<(), TransportError>;

    async fn execute_once(
        &self,
        api: &ApiHandle,
        task: &SubscriptionTask,
        notify: bool,
    ) -> Result<(), TransportError>;

    async fn poll_interval(
        &self,
        api: &ApiHandle,
        sub: &IntervalSubscription,
        notify: bool,
    ) -> Result<(), TransportError>;
}

/// Lifecycle notifications for the windows.
pub trait HubEvents: Send + Sync {
    fn flags_changed(&self, flags: BootstrapFlags);
    fn online_changed(&self, online: bool);
    fn account_synced(&self, account: &Account, snapshot: &AccountSnapshot);
}
