//! Device, wallet, submission and feedback seams used by the coordinators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chainwatch_core::types::SigningRequest;

use crate::error::{DeviceError, DeviceErrorCode, RemoteError};

#[async_trait]
pub trait LedgerDevice: Send + Sync {
    /// Sign `payload` with the key at `account_index`. Returns the signature.
    async fn sign(
        &self,
        account_index: u32,
        payload: &[u8],
        metadata: &[u8],
    ) -> Result<Vec<u8>, DeviceError>;
}

/// Chain-specific metadata the hardware app needs to decode a payload.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    async fn fetch(&self, chain_id: &str) -> Option<Vec<u8>>;
}

/// An established remote-wallet session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub topic: String,
    /// Addresses the wallet approved for this session.
    pub approved: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl RemoteSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn approves(&self, address: &str) -> bool {
        self.approved.iter().any(|a| a == address)
    }
}

#[async_trait]
pub trait RemoteWallet: Send + Sync {
    async fn establish(&self, chain_id: &str) -> Result<RemoteSession, RemoteError>;

    /// Ask the wallet to approve and sign. Resolves when the user responds.
    async fn request_signature(
        &self,
        session: &RemoteSession,
        request: &SigningRequest,
    ) -> Result<Vec<u8>, RemoteError>;
}

#[async_trait]
pub trait ExtrinsicSubmitter: Send + Sync {
    async fn submit(&self, request: &SigningRequest, signature: &[u8]) -> Result<(), String>;
}

/// Notifications for the extrinsic-builder window.
pub trait BuilderFeedback: Send + Sync {
    fn building(&self, tx_id: &str, building: bool);
    fn device_error(&self, tx_id: &str, code: DeviceErrorCode, message: &str);
    fn modal(&self, tx_id: &str, open: bool);
    fn overlay_close(&self);
    fn submitted(&self, tx_id: &str);
    fn failed(&self, tx_id: &str, message: &str);
}
