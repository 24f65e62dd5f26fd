use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Chain identifier, e.g. `"Polkadot"` or `"Westend Asset Hub"`.
pub type ChainId = String;

// ─── Windows ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Main dashboard. Acts as the hub side of every channel endpoint.
    Main,
    Import,
    /// Extrinsic builder.
    Action,
    OpenGov,
    Settings,
    /// Tab host. Children are keyed additionally by tab id.
    Tabs,
}

impl WindowKind {
    pub const ALL: [Self; 6] = [
        Self::Main,
        Self::Import,
        Self::Action,
        Self::OpenGov,
        Self::Settings,
        Self::Tabs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Import => "import",
            Self::Action => "action",
            Self::OpenGov => "open_gov",
            Self::Settings => "settings",
            Self::Tabs => "tabs",
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "main" => Ok(Self::Main),
            "import" => Ok(Self::Import),
            "action" => Ok(Self::Action),
            "open_gov" | "opengov" => Ok(Self::OpenGov),
            "settings" => Ok(Self::Settings),
            "tabs" => Ok(Self::Tabs),
            _ => Err(ProtocolError::UnknownWindowKind(s.to_owned())),
        }
    }
}

/// Opaque window identifier assigned by the window directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle {
    pub id: WindowId,
    pub kind: WindowKind,
    /// Set only for tab-host children.
    pub tab: Option<String>,
}

// ─── Accounts ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountSource {
    Vault,
    Ledger,
    ReadOnly,
    WalletConnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub chain_id: ChainId,
    pub name: String,
    pub source: AccountSource,
}

impl Account {
    pub fn scope(&self) -> TaskScope {
        TaskScope::Account {
            address: self.address.clone(),
            chain_id: self.chain_id.clone(),
        }
    }
}

/// Hydrated balance/staking/governance data for one account, as produced by
/// the account-data collaborator. The core never inspects `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub address: String,
    pub chain_id: ChainId,
    pub data: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}

// ─── Subscription Tasks ───────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enable,
    #[default]
    Disable,
}

impl TaskStatus {
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Enable => Self::Disable,
            Self::Disable => Self::Enable,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == Self::Enable
    }

    pub fn from_enabled(enabled: bool) -> Self {
        if enabled { Self::Enable } else { Self::Disable }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Balances,
    Nominating,
    NominationPools,
    OpenGov,
}

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balances => "balances",
            Self::Nominating => "nominating",
            Self::NominationPools => "nomination_pools",
            Self::OpenGov => "open_gov",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of a set of subscription tasks: one account on one chain, or a
/// chain itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskScope {
    Account { address: String, chain_id: ChainId },
    Chain { chain_id: ChainId },
}

impl TaskScope {
    pub fn chain(chain_id: impl Into<ChainId>) -> Self {
        Self::Chain {
            chain_id: chain_id.into(),
        }
    }

    pub fn account(address: impl Into<String>, chain_id: impl Into<ChainId>) -> Self {
        Self::Account {
            address: address.into(),
            chain_id: chain_id.into(),
        }
    }

    pub fn chain_id(&self) -> &str {
        match self {
            Self::Account { chain_id, .. } | Self::Chain { chain_id } => chain_id,
        }
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Account { address, .. } => Some(address),
            Self::Chain { .. } => None,
        }
    }
}

impl fmt::Display for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account { address, chain_id } => write!(f, "{chain_id}/{address}"),
            Self::Chain { chain_id } => write!(f, "{chain_id}"),
        }
    }
}

/// One togglable notification concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionTask {
    pub action: String,
    pub category: TaskCategory,
    pub chain_id: ChainId,
    pub label: String,
    pub status: TaskStatus,
    /// `None` for chain-level tasks.
    pub account: Option<Account>,
    pub enable_os_notifications: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_args: Option<Vec<String>>,
}

impl SubscriptionTask {
    pub fn scope(&self) -> TaskScope {
        match &self.account {
            Some(account) => TaskScope::account(&account.address, &self.chain_id),
            None => TaskScope::chain(&self.chain_id),
        }
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef {
            action: self.action.clone(),
            scope: self.scope(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }
}

/// Identity of a [`SubscriptionTask`] within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskRef {
    pub action: String,
    pub scope: TaskScope,
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.action, self.scope)
    }
}

// ─── Interval Subscriptions ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntervalKey {
    pub chain_id: ChainId,
    pub action: String,
    pub referendum_id: Option<u32>,
}

impl fmt::Display for IntervalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.referendum_id {
            Some(id) => write!(f, "{}@{}#{id}", self.action, self.chain_id),
            None => write!(f, "{}@{}", self.action, self.chain_id),
        }
    }
}

/// How many timer ticks elapse between two polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSetting {
    pub ticks_to_wait: u32,
    pub label: String,
}

impl IntervalSetting {
    pub fn every(ticks_to_wait: u32) -> Self {
        Self {
            ticks_to_wait: ticks_to_wait.max(1),
            label: format!("{ticks_to_wait} ticks"),
        }
    }
}

impl Default for IntervalSetting {
    fn default() -> Self {
        Self::every(1)
    }
}

/// Polling-based task scoped to a chain and, optionally, a referendum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSubscription {
    pub action: String,
    pub chain_id: ChainId,
    pub referendum_id: Option<u32>,
    pub category: TaskCategory,
    pub label: String,
    pub status: TaskStatus,
    pub enable_os_notifications: bool,
    #[serde(default)]
    pub interval_setting: IntervalSetting,
    #[serde(default)]
    pub tick_counter: u32,
}

impl IntervalSubscription {
    pub fn key(&self) -> IntervalKey {
        IntervalKey {
            chain_id: self.chain_id.clone(),
            action: self.action.clone(),
            referendum_id: self.referendum_id,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }
}

// ─── Connectivity & Bootstrap ─────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    #[default]
    NotStarted,
    Initializing,
    Ready,
    SwitchingOnline,
    SwitchingOffline,
    Aborting,
}

impl BootstrapState {
    pub fn flags(self) -> BootstrapFlags {
        BootstrapFlags {
            app_loading: matches!(self, Self::NotStarted | Self::Initializing),
            is_connecting: self == Self::SwitchingOnline,
            is_aborting: self == Self::Aborting,
        }
    }
}

/// UI-visible projection of [`BootstrapState`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapFlags {
    pub app_loading: bool,
    pub is_connecting: bool,
    pub is_aborting: bool,
}

// ─── Signing ──────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningOutcome {
    #[default]
    Pending,
    Canceled,
    Completed,
}

/// One in-flight signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub tx_id: String,
    pub chain_id: ChainId,
    /// Signer address.
    pub from: String,
    pub payload: Vec<u8>,
    /// Device-specific signing metadata, when the builder already has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<u8>>,
    #[serde(default)]
    pub outcome: SigningOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(address: &str) -> Account {
        Account {
            address: address.to_owned(),
            chain_id: "Polkadot".to_owned(),
            name: "alice".to_owned(),
            source: AccountSource::Vault,
        }
    }

    #[test]
    fn window_kind_parse_accepts_aliases() {
        assert_eq!("open-gov".parse::<WindowKind>().ok(), Some(WindowKind::OpenGov));
        assert_eq!("OpenGov".parse::<WindowKind>().ok(), Some(WindowKind::OpenGov));
        assert_eq!("Tabs".parse::<WindowKind>().ok(), Some(WindowKind::Tabs));
        assert!("console".parse::<WindowKind>().is_err());
    }

    #[test]
    fn window_kind_display_matches_serde() {
        for kind in WindowKind::ALL {
            let json = serde_json::to_value(kind).expect("serialize");
            assert_eq!(json.as_str(), Some(kind.as_str()));
        }
    }

    #[test]
    fn task_scope_follows_account() {
        let mut task = SubscriptionTask {
            action: "subscribe:account:balance:free".to_owned(),
            category: TaskCategory::Balances,
            chain_id: "Polkadot".to_owned(),
            label: "Free Balance".to_owned(),
            status: TaskStatus::Enable,
            account: Some(account("15abc")),
            enable_os_notifications: true,
            action_args: None,
        };
        assert_eq!(task.scope(), TaskScope::account("15abc", "Polkadot"));

        task.account = None;
        assert_eq!(task.scope(), TaskScope::chain("Polkadot"));
        assert_eq!(task.task_ref().to_string(), "subscribe:account:balance:free@Polkadot");
    }

    #[test]
    fn status_serializes_as_enable_disable() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Enable).expect("serialize"),
            "\"enable\""
        );
        assert_eq!(TaskStatus::Enable.flipped(), TaskStatus::Disable);
        assert_eq!(TaskStatus::from_enabled(false), TaskStatus::Disable);
    }

    #[test]
    fn bootstrap_flags_are_projections() {
        assert!(BootstrapState::Initializing.flags().app_loading);
        assert!(BootstrapState::SwitchingOnline.flags().is_connecting);
        assert!(BootstrapState::Aborting.flags().is_aborting);
        assert_eq!(BootstrapState::Ready.flags(), BootstrapFlags::default());
    }

    #[test]
    fn interval_setting_never_zero() {
        assert_eq!(IntervalSetting::every(0).ticks_to_wait, 1);
    }

    #[test]
    fn interval_subscription_defaults_counter() {
        let json = serde_json::json!({
            "action": "subscribe:interval:openGov:referendumVotes",
            "chain_id": "Polkadot",
            "referendum_id": 12,
            "category": "open_gov",
            "label": "Referendum Votes",
            "status": "enable",
            "enable_os_notifications": false,
        });
        let sub: IntervalSubscription = serde_json::from_value(json).expect("deserialize");
        assert_eq!(sub.tick_counter, 0);
        assert_eq!(sub.interval_setting.ticks_to_wait, 1);
        assert_eq!(sub.key().referendum_id, Some(12));
    }
}
