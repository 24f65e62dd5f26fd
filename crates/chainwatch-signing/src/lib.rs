//! chainwatch-signing: coordinators for external signing flows.
//!
//! Both coordinators share a [`PendingSignatures`] ledger so a cancel issued
//! from any window reaches whichever flow owns the transaction.

pub mod collaborators;
pub mod error;
pub mod ledger;
pub mod pending;
pub mod remote;

#[cfg(test)]
mod testing;

pub use collaborators::{
    BuilderFeedback, ExtrinsicSubmitter, LedgerDevice, MetadataCache, RemoteSession, RemoteWallet,
};
pub use error::{DeviceError, DeviceErrorCode, RemoteError, SigningError};
pub use ledger::{LedgerCoordinator, LedgerPhase};
pub use pending::PendingSignatures;
pub use remote::{RemotePhase, RemoteSessionCoordinator};
