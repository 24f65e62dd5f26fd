//! Closed channel message catalogue.
//!
//! Every message crossing a channel endpoint is an [`Envelope`]
//! `{task, data}`. Two directions exist:
//!
//! - [`RendererMessage`]: hub → window (`renderer:*`).
//! - [`MainMessage`]: window → hub (`main:*`).
//!
//! Decoding checks the task name against the closed list first, so an
//! unknown name surfaces as [`ProtocolError::UnrecognizedTask`] rather than
//! a generic payload error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{
    Account, AccountSnapshot, BootstrapFlags, ChainId, IntervalKey, IntervalSubscription,
    SigningRequest, SubscriptionTask, TaskCategory, TaskRef, TaskScope, WindowKind,
};

// ─── Envelope ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub task: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(task: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            task: task.into(),
            data,
        }
    }
}

fn encode<T: Serialize>(message: &T) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_value(serde_json::to_value(message)?)?)
}

fn decode<T: DeserializeOwned>(envelope: &Envelope, known: &[&str]) -> Result<T, ProtocolError> {
    if !known.contains(&envelope.task.as_str()) {
        return Err(ProtocolError::UnrecognizedTask(envelope.task.clone()));
    }
    let mut object = serde_json::Map::new();
    object.insert("task".to_owned(), envelope.task.clone().into());
    if !envelope.data.is_null() {
        object.insert("data".to_owned(), envelope.data.clone());
    }
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        ProtocolError::MalformedPayload {
            task: envelope.task.clone(),
            reason: e.to_string(),
        }
    })
}

// ─── Hub → Window ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "data")]
pub enum RendererMessage {
    #[serde(rename = "renderer:account:add")]
    AccountAdd {
        account: Account,
        snapshot: Option<AccountSnapshot>,
    },
    #[serde(rename = "renderer:account:remove")]
    AccountRemove { address: String, chain_id: ChainId },
    #[serde(rename = "renderer:account:processing")]
    AccountProcessing { address: String, processing: bool },
    #[serde(rename = "renderer:task:add")]
    TaskAdd { task: SubscriptionTask },
    #[serde(rename = "renderer:task:update")]
    TaskUpdate { task: SubscriptionTask },
    #[serde(rename = "renderer:task:remove")]
    TaskRemove { task: SubscriptionTask },
    #[serde(rename = "renderer:interval:add")]
    IntervalAdd { task: IntervalSubscription },
    #[serde(rename = "renderer:interval:update")]
    IntervalUpdate { task: IntervalSubscription },
    #[serde(rename = "renderer:interval:remove")]
    IntervalRemove { task: IntervalSubscription },
    #[serde(rename = "renderer:connection:status")]
    ConnectionStatus { online: bool },
    #[serde(rename = "renderer:bootstrap:flags")]
    BootstrapFlags { flags: BootstrapFlags },
    #[serde(rename = "renderer:wc:modal:open")]
    WcModalOpen { tx_id: String },
    #[serde(rename = "renderer:wc:modal:close")]
    WcModalClose { tx_id: String },
    #[serde(rename = "renderer:ledger:error")]
    LedgerError {
        tx_id: String,
        code: String,
        message: String,
    },
    #[serde(rename = "renderer:tx:building")]
    TxBuilding { tx_id: String, building: bool },
    #[serde(rename = "renderer:tx:submitted")]
    TxSubmitted { tx_id: String },
    #[serde(rename = "renderer:overlay:close")]
    OverlayClose,
    #[serde(rename = "renderer:toast")]
    Toast { message: String },
}

impl RendererMessage {
    pub const TASKS: &'static [&'static str] = &[
        "renderer:account:add",
        "renderer:account:remove",
        "renderer:account:processing",
        "renderer:task:add",
        "renderer:task:update",
        "renderer:task:remove",
        "renderer:interval:add",
        "renderer:interval:update",
        "renderer:interval:remove",
        "renderer:connection:status",
        "renderer:bootstrap:flags",
        "renderer:wc:modal:open",
        "renderer:wc:modal:close",
        "renderer:ledger:error",
        "renderer:tx:building",
        "renderer:tx:submitted",
        "renderer:overlay:close",
        "renderer:toast",
    ];

    pub fn encode(&self) -> Result<Envelope, ProtocolError> {
        encode(self)
    }

    pub fn decode(envelope: &Envelope) -> Result<Self, ProtocolError> {
        decode(envelope, Self::TASKS)
    }

    /// Window kinds whose view can include this message.
    pub fn audience(&self) -> &'static [WindowKind] {
        use WindowKind::{Action, Import, Main, OpenGov, Settings, Tabs};
        match self {
            Self::AccountAdd { .. }
            | Self::AccountRemove { .. }
            | Self::AccountProcessing { .. } => &[Main, Import, Action],
            Self::TaskAdd { .. } | Self::TaskUpdate { .. } | Self::TaskRemove { .. } => {
                &[Main, Tabs]
            }
            Self::IntervalAdd { .. } | Self::IntervalUpdate { .. } | Self::IntervalRemove { .. } => {
                &[Main, OpenGov, Tabs]
            }
            Self::ConnectionStatus { .. } | Self::BootstrapFlags { .. } => &WindowKind::ALL,
            Self::WcModalOpen { .. }
            | Self::WcModalClose { .. }
            | Self::LedgerError { .. }
            | Self::TxBuilding { .. }
            | Self::TxSubmitted { .. }
            | Self::OverlayClose => &[Action, Tabs],
            Self::Toast { .. } => &[Main, Settings],
        }
    }
}

// ─── Window → Hub ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "data")]
pub enum MainMessage {
    #[serde(rename = "main:task:set")]
    TaskSet { task: SubscriptionTask },
    #[serde(rename = "main:task:toggle")]
    TaskToggle { task: TaskRef },
    #[serde(rename = "main:task:notifications")]
    TaskNotifications { task: TaskRef, enabled: bool },
    #[serde(rename = "main:task:execute")]
    TaskExecute { task: TaskRef },
    #[serde(rename = "main:category:toggle")]
    CategoryToggle {
        category: TaskCategory,
        scope: TaskScope,
    },
    #[serde(rename = "main:interval:add")]
    IntervalAdd { tasks: Vec<IntervalSubscription> },
    #[serde(rename = "main:interval:remove")]
    IntervalRemove { keys: Vec<IntervalKey> },
    #[serde(rename = "main:interval:toggle")]
    IntervalToggle { key: IntervalKey },
    #[serde(rename = "main:account:import")]
    AccountImport { account: Account },
    #[serde(rename = "main:account:remove")]
    AccountRemove { address: String, chain_id: ChainId },
    #[serde(rename = "main:backup:import")]
    BackupImport { contents: String },
    #[serde(rename = "main:connection:set")]
    ConnectionSet { online: bool },
    #[serde(rename = "main:endpoint:change")]
    EndpointChange { chain_id: ChainId, endpoint: String },
    #[serde(rename = "main:ledger:sign")]
    LedgerSign {
        request: SigningRequest,
        account_index: u32,
    },
    #[serde(rename = "main:wc:sign")]
    WcSign { request: SigningRequest },
    #[serde(rename = "main:wc:cancel")]
    WcCancel { tx_id: String },
    /// The remote wallet ended a session; relayed by the window hosting it.
    #[serde(rename = "main:wc:session:deleted")]
    WcSessionDeleted { topic: String },
}

impl MainMessage {
    pub const TASKS: &'static [&'static str] = &[
        "main:task:set",
        "main:task:toggle",
        "main:task:notifications",
        "main:task:execute",
        "main:category:toggle",
        "main:interval:add",
        "main:interval:remove",
        "main:interval:toggle",
        "main:account:import",
        "main:account:remove",
        "main:backup:import",
        "main:connection:set",
        "main:endpoint:change",
        "main:ledger:sign",
        "main:wc:sign",
        "main:wc:cancel",
        "main:wc:session:deleted",
    ];

    pub fn encode(&self) -> Result<Envelope, ProtocolError> {
        encode(self)
    }

    pub fn decode(envelope: &Envelope) -> Result<Self, ProtocolError> {
        decode(envelope, Self::TASKS)
    }
}
