use chainwatch_core::types::ChainId;
use chainwatch_tasks::{RegistryError, StoreError};
use thiserror::Error;

/// Chain-scoped connectivity failure. Always recoverable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("chain {0} is not configured")]
    UnknownChain(ChainId),

    #[error("chain {chain} unreachable: {reason}")]
    Unreachable { chain: ChainId, reason: String },

    #[error("no connected api for {0}")]
    NotConnected(ChainId),

    #[error("api call on {chain} failed: {reason}")]
    Api { chain: ChainId, reason: String },
}

impl TransportError {
    pub fn chain(&self) -> &str {
        match self {
            Self::UnknownChain(chain) | Self::NotConnected(chain) => chain,
            Self::Unreachable { chain, .. } | Self::Api { chain, .. } => chain,
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("already initialized")]
    AlreadyInitialized,

    #[error("not initialized yet")]
    NotInitialized,

    #[error("a transition is already running")]
    AlreadyRunning,

    #[error("shutting down")]
    ShuttingDown,

    #[error("app is offline")]
    Offline,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
